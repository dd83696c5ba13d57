//! Split snapshots of phylogenetic trees.
//!
//! # Overview
//! A [`TreeSnapshot`] captures the informative bipartitions (splits) of a
//! tree together with their branch lengths. Snapshots are immutable, so many
//! of them can be compared in parallel.
//!
//! # What is a bipartition?
//! Each internal edge divides the leaves into two groups:
//! ```text
//!   A --\                /-- C
//!        x ---------- y
//!   B --/                \-- D
//! ```
//! The edge x–y yields {A,B} | {C,D}. Edges leading to a single leaf give a
//! trivial split that every tree on the same taxa shares, so they are left
//! out.
//!
//! # Taxon names, not node ids
//! Node ids depend on how a tree was built or parsed. Leaves are therefore
//! mapped to bit positions by their sorted names, so the same taxon lands
//! on the same bit in every snapshot built from the same taxon list.

use crate::bitset::Bitset;
use crate::error::{PhyloError, Result};
use crate::tree::Tree;
use std::collections::{HashMap, HashSet};

/// Immutable set of canonical, informative splits of one tree.
///
/// # Canonicalization
/// {A,B}|{C,D} and {C,D}|{A,B} are the same split. The stored side is always
/// the one that does NOT contain taxon 0 (the alphabetically first name), so
/// rooting the same unrooted tree differently gives the same snapshot.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    /// Sorted taxon names; position = bit index.
    pub taxa: Vec<String>,

    /// Canonical informative splits.
    pub parts: HashSet<Bitset>,

    /// Branch length of each split. The two edges under a bifurcating root
    /// form a single split, so their lengths are summed.
    pub lengths: HashMap<Bitset, f64>,

    /// Number of u64 words in each bitset.
    pub words: usize,

    pub num_leaves: usize,
}

impl TreeSnapshot {
    /// Build a snapshot using the tree's own sorted leaf names as taxon order.
    ///
    /// # Errors
    /// [`PhyloError::Parse`] when a leaf is unnamed or a name repeats.
    pub fn from_tree(tree: &Tree) -> Result<Self> {
        let taxa = tree.sorted_taxa()?;
        Self::with_taxa(tree, &taxa)
    }

    /// Build a snapshot against an externally fixed taxon order, so that
    /// snapshots of many trees (e.g. bootstrap replicates) share bit positions.
    ///
    /// # Errors
    /// [`PhyloError::Parse`] if a leaf name is not in `taxa`.
    pub fn with_taxa(tree: &Tree, taxa: &[String]) -> Result<Self> {
        let num_leaves = taxa.len();
        let words = Bitset::words_for(num_leaves);
        let bitsets = node_bitsets(tree, taxa)?;

        let mut parts = HashSet::new();
        let mut lengths: HashMap<Bitset, f64> = HashMap::new();
        for id in tree.edges() {
            let Some(bs) = &bitsets[id] else { continue };
            if !bs.is_informative(num_leaves) {
                continue;
            }
            let canonical = bs.clone().canonical(num_leaves);
            *lengths.entry(canonical.clone()).or_insert(0.0) += tree.branch_length(id);
            parts.insert(canonical);
        }

        Ok(TreeSnapshot { taxa: taxa.to_vec(), parts, lengths, words, num_leaves })
    }

    /// Number of informative splits.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn contains(&self, split: &Bitset) -> bool {
        self.parts.contains(split)
    }
}

/// Canonical informative split below each node, indexed by node id.
///
/// Entries are `None` for the root, for leaves, and for edges whose split is
/// trivial. Used to attach support values to the internal nodes of a tree.
pub fn node_splits(tree: &Tree, taxa: &[String]) -> Result<Vec<Option<Bitset>>> {
    let n = taxa.len();
    let bitsets = node_bitsets(tree, taxa)?;
    Ok(bitsets
        .into_iter()
        .enumerate()
        .map(|(id, bs)| {
            bs.filter(|b| id != tree.root() && b.is_informative(n))
                .map(|b| b.canonical(n))
        })
        .collect())
}

/// Leaf set below every node, computed bottom-up.
///
/// | node kind | bitset                         |
/// |-----------|--------------------------------|
/// | leaf      | single bit of its taxon index  |
/// | internal  | OR of its children's bitsets   |
fn node_bitsets(tree: &Tree, taxa: &[String]) -> Result<Vec<Option<Bitset>>> {
    let words = Bitset::words_for(taxa.len());
    let index: HashMap<&str, usize> = taxa.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
    let mut bitsets: Vec<Option<Bitset>> = vec![None; tree.len()];

    for id in tree.postorder() {
        let node = tree.node(id);
        let bs = if node.is_leaf() {
            let name = node.name.as_deref().unwrap_or_default();
            let &idx = index
                .get(name)
                .ok_or_else(|| PhyloError::Parse(format!("leaf '{name}' is not among the compared taxa")))?;
            Bitset::singleton(words, idx)
        } else {
            let mut acc = Bitset::zeros(words);
            for &c in &node.children {
                if let Some(child) = &bitsets[c] {
                    acc.or_assign(child);
                }
            }
            acc
        };
        bitsets[id] = Some(bs);
    }
    Ok(bitsets)
}
