//! Pairwise evolutionary distances between aligned sequences.
//!
//! The distance engine fills a flat `n × n` matrix (`values[n*i + j]`) from an
//! [`Alignment`]. Pairs are independent, so they are evaluated in parallel on
//! a bounded pool; the matrix is symmetric with a zero diagonal.

use crate::alignment::{Alignment, SeqType};
use crate::error::{PhyloError, Result};
use crate::pool;
use rayon::prelude::*;

/// Distance reported for saturated or incomparable pairs.
pub const MAX_GENETIC_DIST: f64 = 9.0;

/// Square, symmetric matrix of pairwise distances with row/column names.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    names: Vec<String>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Wrap flat `n*i+j` values.
    ///
    /// # Errors
    /// [`PhyloError::Validation`] if `values.len() != names.len()²` or a value
    /// is negative or not finite.
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Result<Self> {
        let n = names.len();
        if values.len() != n * n {
            return Err(PhyloError::Validation(format!(
                "distance matrix for {n} taxa needs {} values, got {}",
                n * n,
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(PhyloError::Validation(format!("invalid distance value {bad}")));
        }
        Ok(DistanceMatrix { names, values })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Flat row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[self.len() * i + j]
    }

    /// Rows as nested vectors, for tabular output.
    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.values.chunks(self.len().max(1)).map(|r| r.to_vec()).collect()
    }
}

/// A pairwise distance estimator over two aligned residue rows.
pub trait DistanceComputer: Sync {
    fn name(&self) -> &'static str;

    fn distance(&self, a: &[u8], b: &[u8]) -> f64;
}

/// Jukes-Cantor corrected distance for a `k`-state alphabet.
///
/// ```text
/// p = mismatches / compared sites
/// d = -b ln(1 - p / b),   b = (k - 1) / k
/// ```
///
/// Columns where either residue is a gap or ambiguous are skipped.
#[derive(Debug, Clone, Copy)]
pub struct JukesCantor {
    seq_type: SeqType,
}

impl JukesCantor {
    pub fn new(seq_type: SeqType) -> Self {
        JukesCantor { seq_type }
    }

    /// JC correction of an observed proportion of differences.
    pub fn correct(&self, p: f64) -> f64 {
        let k = self.seq_type.num_states() as f64;
        let b = (k - 1.0) / k;
        let arg = 1.0 - p / b;
        if arg <= 0.0 {
            return MAX_GENETIC_DIST;
        }
        let d = -b * arg.ln();
        if d <= 0.0 { 0.0 } else { d.min(MAX_GENETIC_DIST) }
    }
}

impl DistanceComputer for JukesCantor {
    fn name(&self) -> &'static str {
        "JC"
    }

    fn distance(&self, a: &[u8], b: &[u8]) -> f64 {
        let mut compared = 0usize;
        let mut mismatches = 0usize;
        for (&x, &y) in a.iter().zip(b) {
            if let (Some(sx), Some(sy)) = (self.seq_type.state(x), self.seq_type.state(y)) {
                compared += 1;
                if sx != sy {
                    mismatches += 1;
                }
            }
        }
        if compared == 0 {
            return MAX_GENETIC_DIST;
        }
        self.correct(mismatches as f64 / compared as f64)
    }
}

/// Jukes-Cantor distance matrix of an alignment, computed on `threads` workers.
///
/// # Errors
/// [`PhyloError::DegenerateInput`] for fewer than two taxa.
pub fn compute_distances(alignment: &Alignment, threads: usize) -> Result<DistanceMatrix> {
    compute_with(alignment, &JukesCantor::new(alignment.seq_type()), threads)
}

/// Distance matrix under any [`DistanceComputer`].
pub fn compute_with<D: DistanceComputer>(
    alignment: &Alignment,
    computer: &D,
    threads: usize,
) -> Result<DistanceMatrix> {
    let n = alignment.len();
    if n < 2 {
        return Err(PhyloError::DegenerateInput(format!(
            "distance matrix needs at least 2 sequences, got {n}"
        )));
    }

    let pairs: Vec<(usize, usize, f64)> = pool::install(threads, || {
        (0..n)
            .into_par_iter()
            .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
            .map(|(i, j)| (i, j, computer.distance(alignment.row(i), alignment.row(j))))
            .collect()
    })?;

    let mut values = vec![0.0; n * n];
    for (i, j, d) in pairs {
        values[n * i + j] = d;
        values[n * j + i] = d;
    }
    log::debug!("computed {} {} distances for {n} taxa", n * (n - 1) / 2, computer.name());
    DistanceMatrix::new(alignment.names().to_vec(), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_are_zero() {
        let aln = Alignment::new(vec!["a", "b"], vec!["ACGTACGT", "ACGTACGT"]).unwrap();
        let dm = compute_distances(&aln, 1).unwrap();
        assert_eq!(dm.get(0, 1), 0.0);
    }

    #[test]
    fn matches_closed_form() {
        // 1 mismatch in 10 sites.
        let aln = Alignment::new(vec!["a", "b"], vec!["AAAAAAAAAA", "AAAAAAAAAC"]).unwrap();
        let dm = compute_distances(&aln, 1).unwrap();
        let expected = -0.75 * (1.0 - 0.1f64 / 0.75).ln();
        assert!((dm.get(0, 1) - expected).abs() <= 1e-12);
    }

    #[test]
    fn gaps_and_ambiguity_are_skipped() {
        let aln = Alignment::new(vec!["a", "b"], vec!["AC-TN", "ACGRA"]).unwrap();
        let dm = compute_distances(&aln, 1).unwrap();
        assert_eq!(dm.get(0, 1), 0.0);
    }

    #[test]
    fn saturated_pairs_are_clamped() {
        let aln = Alignment::new(vec!["a", "b", "c"], vec!["ACGT", "CATG", "----"]).unwrap();
        let dm = compute_distances(&aln, 2).unwrap();
        assert_eq!(dm.get(0, 1), MAX_GENETIC_DIST);
        assert_eq!(dm.get(0, 2), MAX_GENETIC_DIST);
        assert!(dm.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn symmetric_with_zero_diagonal() {
        let aln = Alignment::new(
            vec!["a", "b", "c", "d"],
            vec!["ACGTACGTAA", "ACGTACGTTT", "ACGAACGTAA", "TCGAACCTAA"],
        )
        .unwrap();
        let dm = compute_distances(&aln, 3).unwrap();
        for i in 0..4 {
            assert_eq!(dm.get(i, i), 0.0);
            for j in 0..4 {
                assert_eq!(dm.get(i, j), dm.get(j, i));
                assert!(dm.get(i, j) >= 0.0);
            }
        }
    }

    #[test]
    fn single_taxon_is_degenerate() {
        let aln = Alignment::new(vec!["a"], vec!["ACGT"]).unwrap();
        assert!(matches!(compute_distances(&aln, 1), Err(PhyloError::DegenerateInput(_))));
    }

    #[test]
    fn protein_uses_twenty_states() {
        let jc = JukesCantor::new(SeqType::Protein);
        let expected = -(19.0 / 20.0) * (1.0 - 0.5f64 / (19.0 / 20.0)).ln();
        assert!((jc.correct(0.5) - expected).abs() <= 1e-12);
    }

    #[test]
    fn matrix_validation() {
        assert!(DistanceMatrix::new(vec!["a".into()], vec![0.0, 1.0]).is_err());
        assert!(DistanceMatrix::new(vec!["a".into(), "b".into()], vec![0.0, f64::NAN, 1.0, 0.0]).is_err());
    }
}
