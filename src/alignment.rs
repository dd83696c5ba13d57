//! Validated multiple sequence alignments.
//!
//! An [`Alignment`] pairs taxon names with aligned residue strings. It is
//! immutable once built: every engine borrows it, and bootstrap replicates
//! are produced as fresh alignments through [`Alignment::resample_columns`].
//!
//! # Alphabets
//! The alphabet is detected from the residues: when at least 90% of the
//! informative characters are `A`, `C`, `G`, `T`, `U` or `N` the alignment is
//! treated as DNA, otherwise as protein. Gaps (`-`, `.`), `?` and the fully
//! ambiguous codes (`N` for DNA, `X` for protein) are treated as missing data.

use crate::error::{PhyloError, Result};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Amino acid state order used for protein encodings.
pub const AMINO_ACIDS: &[u8; 20] = b"ARNDCQEGHILKMFPSTWYV";

/// Nucleotide state order used for DNA encodings.
pub const NUCLEOTIDES: &[u8; 4] = b"ACGT";

/// Alphabet of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqType {
    Dna,
    Protein,
}

impl SeqType {
    /// Number of character states in the alphabet.
    pub fn num_states(self) -> usize {
        match self {
            SeqType::Dna => 4,
            SeqType::Protein => 20,
        }
    }

    /// Map a residue to its state index, or `None` when it is ambiguous or missing.
    pub fn state(self, residue: u8) -> Option<usize> {
        match self {
            SeqType::Dna => match residue {
                b'A' => Some(0),
                b'C' => Some(1),
                b'G' => Some(2),
                b'T' | b'U' => Some(3),
                _ => None,
            },
            SeqType::Protein => AMINO_ACIDS.iter().position(|&a| a == residue),
        }
    }

    /// States compatible with a residue. Missing data is compatible with
    /// every state; an unknown character yields `None`.
    pub fn compatible_states(self, residue: u8) -> Option<Vec<usize>> {
        if let Some(s) = self.state(residue) {
            return Some(vec![s]);
        }
        if is_missing(residue) {
            return Some((0..self.num_states()).collect());
        }
        let codes: &[u8] = match self {
            SeqType::Dna => match residue {
                b'R' => b"AG",
                b'Y' => b"CT",
                b'S' => b"CG",
                b'W' => b"AT",
                b'K' => b"GT",
                b'M' => b"AC",
                b'B' => b"CGT",
                b'D' => b"AGT",
                b'H' => b"ACT",
                b'V' => b"ACG",
                b'N' => b"ACGT",
                _ => return None,
            },
            SeqType::Protein => match residue {
                b'B' => b"ND",
                b'Z' => b"QE",
                b'J' => b"IL",
                b'X' | b'*' => AMINO_ACIDS,
                _ => return None,
            },
        };
        Some(codes.iter().filter_map(|&c| self.state(c)).collect())
    }
}

impl fmt::Display for SeqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqType::Dna => write!(f, "DNA"),
            SeqType::Protein => write!(f, "AA"),
        }
    }
}

fn is_missing(residue: u8) -> bool {
    matches!(residue, b'-' | b'.' | b'?')
}

/// An immutable, validated alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    names: Vec<String>,
    sequences: Vec<Vec<u8>>,
    seq_type: SeqType,
}

impl Alignment {
    /// Build an alignment from parallel name and sequence containers.
    ///
    /// # Errors
    /// Returns [`PhyloError::Validation`] when the containers differ in size,
    /// the alignment is empty, sequences have unequal lengths, names repeat,
    /// or a residue is not a recognised code.
    pub fn new<N, S>(names: Vec<N>, sequences: Vec<S>) -> Result<Self>
    where
        N: Into<String>,
        S: AsRef<str>,
    {
        if names.len() != sequences.len() {
            return Err(PhyloError::Validation(format!(
                "{} names given for {} sequences",
                names.len(),
                sequences.len()
            )));
        }
        if names.is_empty() {
            return Err(PhyloError::Validation("alignment has no sequences".into()));
        }

        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(PhyloError::Validation(format!("duplicate taxon name '{name}'")));
            }
        }

        let sequences: Vec<Vec<u8>> = sequences
            .iter()
            .map(|s| s.as_ref().trim().to_ascii_uppercase().into_bytes())
            .collect();
        let width = sequences[0].len();
        if width == 0 {
            return Err(PhyloError::Validation("alignment has zero width".into()));
        }
        for (name, seq) in names.iter().zip(&sequences) {
            if seq.len() != width {
                return Err(PhyloError::Validation(format!(
                    "sequence '{name}' has length {} but expected {width}",
                    seq.len()
                )));
            }
        }

        let seq_type = detect_seq_type(&sequences);
        for (name, seq) in names.iter().zip(&sequences) {
            if let Some(&bad) = seq.iter().find(|&&c| seq_type.compatible_states(c).is_none()) {
                return Err(PhyloError::Validation(format!(
                    "sequence '{name}' contains invalid {seq_type} character '{}'",
                    bad as char
                )));
            }
        }

        Ok(Alignment { names, sequences, seq_type })
    }

    /// Number of taxa.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of aligned columns.
    pub fn width(&self) -> usize {
        self.sequences[0].len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn seq_type(&self) -> SeqType {
        self.seq_type
    }

    /// Residues of the named taxon, upper-cased.
    pub fn sequence(&self, name: &str) -> Option<&str> {
        let idx = self.names.iter().position(|n| n == name)?;
        std::str::from_utf8(&self.sequences[idx]).ok()
    }

    /// Raw residues of the taxon at `idx`.
    pub fn row(&self, idx: usize) -> &[u8] {
        &self.sequences[idx]
    }

    /// Residue of taxon `taxon` at column `site`.
    #[inline]
    pub fn residue(&self, taxon: usize, site: usize) -> u8 {
        self.sequences[taxon][site]
    }

    /// Draw `width` columns with replacement to form a bootstrap replicate.
    pub fn resample_columns<R: Rng>(&self, rng: &mut R) -> Alignment {
        let width = self.width();
        let picks: Vec<usize> = (0..width).map(|_| rng.random_range(0..width)).collect();
        let sequences = self
            .sequences
            .iter()
            .map(|seq| picks.iter().map(|&p| seq[p]).collect())
            .collect();
        Alignment {
            names: self.names.clone(),
            sequences,
            seq_type: self.seq_type,
        }
    }

    /// Merge identical columns into weighted site patterns.
    pub fn patterns(&self) -> SitePatterns {
        let n = self.len();
        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut columns: Vec<Vec<u8>> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();

        for site in 0..self.width() {
            let column: Vec<u8> = (0..n).map(|t| self.sequences[t][site]).collect();
            match index.get(&column) {
                Some(&p) => weights[p] += 1.0,
                None => {
                    index.insert(column.clone(), columns.len());
                    columns.push(column);
                    weights.push(1.0);
                }
            }
        }

        SitePatterns { columns, weights, seq_type: self.seq_type }
    }

    /// Empirical state frequencies. Ambiguous residues spread their count
    /// evenly over the compatible states; missing data is ignored. Zero
    /// frequencies are floored so that every state stays reachable.
    pub fn state_frequencies(&self) -> Vec<f64> {
        let k = self.seq_type.num_states();
        let mut counts = vec![0.0f64; k];
        for seq in &self.sequences {
            for &c in seq {
                if is_missing(c) {
                    continue;
                }
                if let Some(states) = self.seq_type.compatible_states(c) {
                    if states.len() == k {
                        continue;
                    }
                    let share = 1.0 / states.len() as f64;
                    for s in states {
                        counts[s] += share;
                    }
                }
            }
        }
        normalize_frequencies(&mut counts);
        counts
    }
}

/// Scale `freqs` to sum to one, flooring tiny entries at `1e-4`. An all-zero
/// vector becomes uniform.
pub(crate) fn normalize_frequencies(freqs: &mut [f64]) {
    const MIN_FREQ: f64 = 1e-4;
    let total: f64 = freqs.iter().sum();
    if total <= 0.0 {
        let u = 1.0 / freqs.len() as f64;
        freqs.iter_mut().for_each(|f| *f = u);
        return;
    }
    freqs.iter_mut().for_each(|f| *f = (*f / total).max(MIN_FREQ));
    let total: f64 = freqs.iter().sum();
    freqs.iter_mut().for_each(|f| *f /= total);
}

fn detect_seq_type(sequences: &[Vec<u8>]) -> SeqType {
    let mut informative = 0usize;
    let mut nucleotide = 0usize;
    for &c in sequences.iter().flatten() {
        if is_missing(c) {
            continue;
        }
        informative += 1;
        if matches!(c, b'A' | b'C' | b'G' | b'T' | b'U' | b'N') {
            nucleotide += 1;
        }
    }
    if informative == 0 || nucleotide * 10 >= informative * 9 {
        SeqType::Dna
    } else {
        SeqType::Protein
    }
}

/// Alignment columns merged by identity, with the number of sites each stands for.
#[derive(Debug, Clone)]
pub struct SitePatterns {
    /// One entry per distinct column; each holds one residue per taxon.
    pub columns: Vec<Vec<u8>>,
    pub weights: Vec<f64>,
    pub seq_type: SeqType,
}

impl SitePatterns {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Total number of sites represented.
    pub fn num_sites(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// True if every taxon shows the same state (or missing data) in pattern `p`,
    /// returning that state. Used by the invariant-sites model.
    pub fn constant_state(&self, p: usize) -> Option<Vec<usize>> {
        let k = self.seq_type.num_states();
        let mut allowed = vec![true; k];
        for &c in &self.columns[p] {
            let states = self.seq_type.compatible_states(c)?;
            let mut mask = vec![false; k];
            for s in states {
                mask[s] = true;
            }
            for (a, m) in allowed.iter_mut().zip(&mask) {
                *a &= *m;
            }
        }
        let states: Vec<usize> = (0..k).filter(|&s| allowed[s]).collect();
        if states.is_empty() { None } else { Some(states) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn small() -> Alignment {
        Alignment::new(
            vec!["a", "b", "c", "d"],
            vec!["ACGTAC", "ACGTTC", "acgaac", "ACG-AC"],
        )
        .unwrap()
    }

    #[test]
    fn builds_and_exposes_rows() {
        let aln = small();
        assert_eq!(aln.len(), 4);
        assert_eq!(aln.width(), 6);
        assert_eq!(aln.seq_type(), SeqType::Dna);
        assert_eq!(aln.sequence("c"), Some("ACGAAC"));
        assert_eq!(aln.sequence("zz"), None);
    }

    #[test]
    fn rejects_inconsistent_input() {
        assert!(matches!(
            Alignment::new(vec!["a", "b"], vec!["AC"]),
            Err(PhyloError::Validation(_))
        ));
        assert!(matches!(
            Alignment::new(vec!["a", "b"], vec!["AC", "ACG"]),
            Err(PhyloError::Validation(_))
        ));
        assert!(matches!(
            Alignment::new(vec!["a", "a"], vec!["AC", "AG"]),
            Err(PhyloError::Validation(_))
        ));
        assert!(matches!(
            Alignment::new(Vec::<String>::new(), Vec::<String>::new()),
            Err(PhyloError::Validation(_))
        ));
        assert!(matches!(
            Alignment::new(vec!["a", "b"], vec!["AC", "A%"]),
            Err(PhyloError::Validation(_))
        ));
    }

    #[test]
    fn detects_protein() {
        let aln = Alignment::new(vec!["x", "y"], vec!["MKLVWRE", "MKIVWRD"]).unwrap();
        assert_eq!(aln.seq_type(), SeqType::Protein);
        assert_eq!(SeqType::Protein.state(b'V'), Some(19));
    }

    #[test]
    fn ambiguity_codes_expand() {
        assert_eq!(SeqType::Dna.compatible_states(b'R'), Some(vec![0, 2]));
        assert_eq!(SeqType::Dna.compatible_states(b'-'), Some(vec![0, 1, 2, 3]));
        assert_eq!(SeqType::Dna.compatible_states(b'Q'), None);
        assert_eq!(SeqType::Protein.compatible_states(b'Z').map(|v| v.len()), Some(2));
    }

    #[test]
    fn patterns_merge_identical_columns() {
        let aln = Alignment::new(vec!["a", "b", "c"], vec!["AAAC", "AAAC", "GGAC"]).unwrap();
        let pats = aln.patterns();
        assert_eq!(pats.len(), 3);
        assert_eq!(pats.weights, vec![2.0, 1.0, 1.0]);
        assert_eq!(pats.num_sites(), 4.0);
        assert_eq!(pats.constant_state(1), Some(vec![0]));
        assert_eq!(pats.constant_state(0), None);
    }

    #[test]
    fn frequencies_sum_to_one() {
        let freqs = small().state_frequencies();
        assert_eq!(freqs.len(), 4);
        assert!((freqs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(freqs.iter().all(|&f| f > 0.0));
    }

    #[test]
    fn resampling_keeps_shape_and_is_seeded() {
        let aln = small();
        let mut r1 = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut r2 = Xoshiro256PlusPlus::seed_from_u64(7);
        let a = aln.resample_columns(&mut r1);
        let b = aln.resample_columns(&mut r2);
        assert_eq!(a, b);
        assert_eq!(a.width(), aln.width());
        assert_eq!(a.names(), aln.names());
    }
}
