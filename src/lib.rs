//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `alignment`: validated sequence alignments, site patterns, resampling.
//! - `distance`: Jukes-Cantor distance matrices.
//! - `nj`: neighbour joining with Rapid-NJ pair selection.
//! - `random`: random trees under six generation modes.
//! - `search` / `bootstrap`: maximum-likelihood tree search and support.
//! - `model_finder`: model selection by AIC / AICc / BIC.
//! - `compare`, `snapshot`, `bitset`: split-based tree distances.
//! - `likelihood`, `subst`, `rates`, `model`, `protein`, `optimize`: the likelihood engine.
//! - `tree`, `newick`: the arena tree and its Newick form.
//! - `io`: FASTA / Newick readers and TSV / JSON writers for the CLI.

pub mod alignment;
pub mod bitset;
pub mod bootstrap;
pub mod compare;
pub mod distance;
pub mod error;
pub mod io;
pub mod likelihood;
pub mod model;
pub mod model_finder;
pub mod newick;
pub mod nj;
pub mod optimize;
pub mod pool;
pub mod protein;
pub mod random;
pub mod rates;
pub mod report;
pub mod search;
pub mod simulate;
pub mod snapshot;
pub mod subst;
pub mod tree;

// Re-export frequently used types & functions
pub use alignment::{Alignment, SeqType};
pub use bitset::Bitset;
pub use compare::{pairwise_robinson_foulds, robinson_foulds, robinson_foulds_newick};
pub use distance::{DistanceComputer, DistanceMatrix, JukesCantor, compute_distances};
pub use error::{PhyloError, Result};
pub use model::Model;
pub use model_finder::{ModelFinder, ModelFinderConfig, ModelFinderResult, ModelSelector, select_model};
pub use nj::{build_nj_tree, nj_from_matrix};
pub use random::{RandomTrees, TreeGenMode, generate_random_trees};
pub use report::{AnalysisResult, SearchStatus};
pub use search::{MlSearch, SearchConfig, TreeSearcher, build_tree, fit_tree};
pub use snapshot::TreeSnapshot;
pub use tree::Tree;

/// Version of the engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_package_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::VERSION.split('.').count(), 3);
    }
}
