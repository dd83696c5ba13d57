//! Error type shared by every engine in the crate.
//!
//! Structural problems (bad input, malformed trees, unknown configuration
//! strings) are reported through [`PhyloError`]. Search budget exhaustion is
//! not an error: it is reported through
//! [`SearchStatus`](crate::report::SearchStatus) on the result.

use thiserror::Error;

/// Errors raised by the alignment, distance, tree and model engines.
#[derive(Debug, Error)]
pub enum PhyloError {
    /// Inconsistent input: mismatched container sizes, unequal sequence
    /// lengths, duplicate names, or a tree whose taxa differ from the alignment.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed Newick text or tree pairs with different leaf label sets.
    #[error("parse error: {0}")]
    Parse(String),

    /// Too few taxa for the requested operation.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Unknown model, frequency, rate or generation mode name, or a bad
    /// thread configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PhyloError>;
