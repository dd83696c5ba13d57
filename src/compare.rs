//! Tree comparison metrics on split snapshots.
//!
//! 1. **Robinson-Foulds (RF)**: number of informative splits found in exactly
//!    one of the two trees. Trees are compared unrooted; range [0, 2n-6] for
//!    binary trees on n taxa.
//!
//! 2. **Weighted Robinson-Foulds**: for shared splits add |length_a - length_b|,
//!    for unique splits add the full branch length.
//!
//! 3. **Kuhner-Felsenstein (branch score)**: sqrt(Σ (length_a - length_b)²)
//!    over the same split union.
//!
//! All three require both trees to carry the same leaf label set.

use crate::error::{PhyloError, Result};
use crate::newick::parse_newick;
use crate::pool;
use crate::snapshot::TreeSnapshot;
use crate::tree::Tree;
use rayon::prelude::*;

/// Which pairwise metric to compute over a collection of trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    RobinsonFoulds,
    Weighted,
    KuhnerFelsenstein,
}

/// RF distance between two Newick strings.
///
/// ```
/// # use phylo_engine::compare::robinson_foulds_newick;
/// let d = robinson_foulds_newick("((A,B),(C,D));", "((A,C),(B,D));").unwrap();
/// assert_eq!(d, 2);
/// ```
///
/// # Errors
/// [`PhyloError::Parse`] if either string is malformed or the leaf label
/// sets differ.
pub fn robinson_foulds_newick(newick_a: &str, newick_b: &str) -> Result<usize> {
    let a = parse_newick(newick_a)?;
    let b = parse_newick(newick_b)?;
    robinson_foulds(&a, &b)
}

/// RF distance between two trees on the same taxa.
///
/// # Example
/// ```text
/// Tree 1:  ((A,B),(C,D),E)     splits: {A,B}, {C,D}
/// Tree 2:  ((A,C),(B,D),E)     splits: {A,C}, {B,D}
///
/// shared: none
/// RF = 2 + 2 - 2*0 = 4
/// ```
pub fn robinson_foulds(tree_a: &Tree, tree_b: &Tree) -> Result<usize> {
    let (a, b) = paired_snapshots(tree_a, tree_b)?;
    Ok(rf_from_snapshots(&a, &b))
}

/// RF from two snapshots built over the same taxon order.
///
/// ```text
/// RF = |A| + |B| - 2 |A ∩ B|
/// ```
pub fn rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> usize {
    let inter = a.parts.intersection(&b.parts).count();
    a.parts.len() + b.parts.len() - 2 * inter
}

/// Weighted RF distance between two trees on the same taxa.
///
/// ```text
/// Tree 1: ((A:1,B:1):2,C:1,(D:1,E:1):2);
/// Tree 2: ((A:1,B:1):3,C:1,(D:1,E:1):2);
///
/// shared {A,B}: |2 - 3| = 1
/// shared {D,E}: |2 - 2| = 0
/// ```
pub fn weighted_robinson_foulds(tree_a: &Tree, tree_b: &Tree) -> Result<f64> {
    let (a, b) = paired_snapshots(tree_a, tree_b)?;
    Ok(weighted_rf_from_snapshots(&a, &b))
}

pub fn weighted_rf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    let mut distance = 0.0;
    for part in &a.parts {
        let length_a = a.lengths.get(part).copied().unwrap_or(0.0);
        match b.lengths.get(part) {
            Some(length_b) => distance += (length_a - length_b).abs(),
            None => distance += length_a,
        }
    }
    for part in b.parts.iter().filter(|p| !a.parts.contains(*p)) {
        distance += b.lengths.get(part).copied().unwrap_or(0.0);
    }
    distance
}

/// Kuhner-Felsenstein branch score distance between two trees on the same taxa.
///
/// More sensitive than weighted RF to a few large length differences; it
/// is the Euclidean distance in split-length space.
pub fn kuhner_felsenstein(tree_a: &Tree, tree_b: &Tree) -> Result<f64> {
    let (a, b) = paired_snapshots(tree_a, tree_b)?;
    Ok(kf_from_snapshots(&a, &b))
}

pub fn kf_from_snapshots(a: &TreeSnapshot, b: &TreeSnapshot) -> f64 {
    let mut sum_squared = 0.0;
    for part in &a.parts {
        let length_a = a.lengths.get(part).copied().unwrap_or(0.0);
        let diff = match b.lengths.get(part) {
            Some(length_b) => length_a - length_b,
            None => length_a,
        };
        sum_squared += diff * diff;
    }
    for part in b.parts.iter().filter(|p| !a.parts.contains(*p)) {
        let length_b = b.lengths.get(part).copied().unwrap_or(0.0);
        sum_squared += length_b * length_b;
    }
    sum_squared.sqrt()
}

/// Snapshot every tree against one shared taxon order.
///
/// # Errors
/// [`PhyloError::Parse`] if any tree's leaf set differs from the first tree's.
pub fn build_snapshots(trees: &[Tree]) -> Result<Vec<TreeSnapshot>> {
    let Some(first) = trees.first() else {
        return Ok(Vec::new());
    };
    let taxa = first.sorted_taxa()?;
    trees
        .iter()
        .enumerate()
        .map(|(k, t)| {
            let own = t.sorted_taxa()?;
            if own != taxa {
                return Err(PhyloError::Parse(format!(
                    "tree {k} has a different leaf label set than tree 0"
                )));
            }
            TreeSnapshot::with_taxa(t, &taxa)
        })
        .collect()
}

/// Pairwise distances over a collection of trees as a flat `n*i+j` matrix,
/// computed on a pool of `threads` workers.
///
/// RF values are whole numbers stored as `f64` so all metrics share one
/// matrix type.
pub fn pairwise_distances(trees: &[Tree], metric: Metric, threads: usize) -> Result<Vec<f64>> {
    let snaps = build_snapshots(trees)?;
    let n = snaps.len();
    let pairs: Vec<(usize, usize, f64)> = pool::install(threads, || {
        (0..n)
            .into_par_iter()
            .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
            .map(|(i, j)| {
                let d = match metric {
                    Metric::RobinsonFoulds => rf_from_snapshots(&snaps[i], &snaps[j]) as f64,
                    Metric::Weighted => weighted_rf_from_snapshots(&snaps[i], &snaps[j]),
                    Metric::KuhnerFelsenstein => kf_from_snapshots(&snaps[i], &snaps[j]),
                };
                (i, j, d)
            })
            .collect()
    })?;

    let mut mat = vec![0.0; n * n];
    for (i, j, d) in pairs {
        mat[n * i + j] = d;
        mat[n * j + i] = d;
    }
    Ok(mat)
}

/// Pairwise RF matrix over many trees.
pub fn pairwise_robinson_foulds(trees: &[Tree], threads: usize) -> Result<Vec<usize>> {
    Ok(pairwise_distances(trees, Metric::RobinsonFoulds, threads)?
        .into_iter()
        .map(|d| d as usize)
        .collect())
}

fn paired_snapshots(tree_a: &Tree, tree_b: &Tree) -> Result<(TreeSnapshot, TreeSnapshot)> {
    let taxa_a = tree_a.sorted_taxa()?;
    let taxa_b = tree_b.sorted_taxa()?;
    if taxa_a != taxa_b {
        return Err(PhyloError::Parse(format!(
            "trees have different leaf label sets ({} vs {} taxa)",
            taxa_a.len(),
            taxa_b.len()
        )));
    }
    Ok((TreeSnapshot::with_taxa(tree_a, &taxa_a)?, TreeSnapshot::with_taxa(tree_b, &taxa_a)?))
}
