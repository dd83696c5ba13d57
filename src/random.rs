//! Random tree generation.
//!
//! Six generation modes are supported, all producing unrooted trees with
//! leaves `T1..Tn` and exponentially distributed branch lengths:
//!
//! | Mode           | Topology                                                |
//! |----------------|---------------------------------------------------------|
//! | `YULE_HARDING` | repeatedly split a uniformly chosen leaf                |
//! | `UNIFORM`      | insert each leaf on a uniformly chosen edge             |
//! | `CATERPILLAR`  | ladder over a shuffled leaf order                       |
//! | `BALANCED`     | recursive halving of a shuffled leaf order              |
//! | `BIRTH_DEATH`  | reconstructed tree of a birth-death process             |
//! | `STAR_TREE`    | one internal node joined to every leaf                  |
//!
//! ```
//! use phylo_engine::random::{generate_random_trees, TreeGenMode};
//! let trees: Vec<_> = generate_random_trees(5, TreeGenMode::StarTree, 1, 42).unwrap().collect();
//! assert_eq!(trees.len(), 1);
//! assert_eq!(trees[0].node(trees[0].root()).children.len(), 5);
//! ```

use crate::error::{PhyloError, Result};
use crate::tree::{NodeId, Tree};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fmt;
use std::str::FromStr;

pub const MEAN_BRANCH_LENGTH: f64 = 0.1;
pub const MIN_RANDOM_BRANCH: f64 = 1e-6;
pub const MAX_RANDOM_BRANCH: f64 = 0.999_999;

const BIRTH_RATE: f64 = 1.0;
const DEATH_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeGenMode {
    YuleHarding,
    Uniform,
    Caterpillar,
    Balanced,
    BirthDeath,
    StarTree,
}

impl TreeGenMode {
    pub const ALL: [TreeGenMode; 6] = [
        Self::YuleHarding,
        Self::Uniform,
        Self::Caterpillar,
        Self::Balanced,
        Self::BirthDeath,
        Self::StarTree,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::YuleHarding => "YULE_HARDING",
            Self::Uniform => "UNIFORM",
            Self::Caterpillar => "CATERPILLAR",
            Self::Balanced => "BALANCED",
            Self::BirthDeath => "BIRTH_DEATH",
            Self::StarTree => "STAR_TREE",
        }
    }
}

impl fmt::Display for TreeGenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TreeGenMode {
    type Err = PhyloError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| PhyloError::Configuration(format!("unknown tree generation mode '{s}'")))
    }
}

/// Lazy, finite stream of random trees. Cloning snapshots the generator, so
/// a clone yields the same remaining trees; [`RandomTrees::restart`] rewinds
/// to the first tree.
#[derive(Debug, Clone)]
pub struct RandomTrees {
    num_taxa: usize,
    mode: TreeGenMode,
    count: usize,
    seed: u64,
    produced: usize,
    rng: Xoshiro256PlusPlus,
    lengths: Exp<f64>,
}

impl RandomTrees {
    /// # Errors
    /// - [`PhyloError::DegenerateInput`] for fewer than 3 taxa
    pub fn new(num_taxa: usize, mode: TreeGenMode, count: usize, seed: u64) -> Result<Self> {
        if num_taxa < 3 {
            return Err(PhyloError::DegenerateInput(format!(
                "random trees need at least 3 taxa, got {num_taxa}"
            )));
        }
        let seed = if seed == 0 { fresh_seed() } else { seed };
        let lengths = Exp::new(1.0 / MEAN_BRANCH_LENGTH)
            .map_err(|e| PhyloError::Configuration(format!("branch length distribution: {e}")))?;
        Ok(RandomTrees {
            num_taxa,
            mode,
            count,
            seed,
            produced: 0,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            lengths,
        })
    }

    /// Seed actually used (a fresh one when constructed with 0).
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn mode(&self) -> TreeGenMode {
        self.mode
    }

    pub fn restart(&mut self) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        self.produced = 0;
    }
}

impl Iterator for RandomTrees {
    type Item = Tree;

    fn next(&mut self) -> Option<Tree> {
        if self.produced >= self.count {
            return None;
        }
        self.produced += 1;
        Some(random_tree_with(self.num_taxa, self.mode, &mut self.rng, &self.lengths))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.produced;
        (left, Some(left))
    }
}

impl ExactSizeIterator for RandomTrees {}

/// `count` random trees of `num_taxa` leaves. `seed == 0` picks a fresh seed.
///
/// # Errors
/// [`PhyloError::DegenerateInput`] for fewer than 3 taxa.
pub fn generate_random_trees(num_taxa: usize, mode: TreeGenMode, count: usize, seed: u64) -> Result<RandomTrees> {
    RandomTrees::new(num_taxa, mode, count, seed)
}

/// One random tree drawn from `rng`.
pub fn random_tree<R: Rng>(num_taxa: usize, mode: TreeGenMode, rng: &mut R) -> Result<Tree> {
    if num_taxa < 3 {
        return Err(PhyloError::DegenerateInput(format!(
            "random trees need at least 3 taxa, got {num_taxa}"
        )));
    }
    let lengths = Exp::new(1.0 / MEAN_BRANCH_LENGTH)
        .map_err(|e| PhyloError::Configuration(format!("branch length distribution: {e}")))?;
    Ok(random_tree_with(num_taxa, mode, rng, &lengths))
}

/// A random tree whose leaves carry `taxa` instead of `T1..Tn`.
pub fn random_tree_for_taxa<R: Rng>(taxa: &[String], mode: TreeGenMode, rng: &mut R) -> Result<Tree> {
    let mut tree = random_tree(taxa.len(), mode, rng)?;
    for leaf in tree.leaves() {
        let node = tree.node_mut(leaf);
        let idx = node.name.as_deref().and_then(|n| n.strip_prefix('T')).and_then(|n| n.parse::<usize>().ok());
        if let Some(name) = idx.and_then(|i| i.checked_sub(1)).and_then(|i| taxa.get(i)) {
            node.name = Some(name.clone());
        }
    }
    Ok(tree)
}

pub(crate) fn fresh_seed() -> u64 {
    let mut rng = rand::rng();
    loop {
        let seed: u64 = rng.random();
        if seed != 0 {
            return seed;
        }
    }
}

fn random_tree_with<R: Rng>(n: usize, mode: TreeGenMode, rng: &mut R, lengths: &Exp<f64>) -> Tree {
    let mut tree = match mode {
        TreeGenMode::YuleHarding => yule_harding(n, rng),
        TreeGenMode::Uniform => uniform(n, rng),
        TreeGenMode::Caterpillar => caterpillar(n),
        TreeGenMode::Balanced => balanced(n),
        TreeGenMode::BirthDeath => birth_death(n, rng),
        TreeGenMode::StarTree => star(n),
    };

    let mut names: Vec<String> = (1..=n).map(|i| format!("T{i}")).collect();
    if mode != TreeGenMode::StarTree {
        names.shuffle(rng);
    }
    for (leaf, name) in tree.leaves().into_iter().zip(names) {
        tree.node_mut(leaf).name = Some(name);
    }
    tree.unroot();
    for id in tree.edges() {
        let t = lengths.sample(rng).clamp(MIN_RANDOM_BRANCH, MAX_RANDOM_BRANCH);
        tree.set_branch_length(id, t);
    }
    tree
}

fn star(n: usize) -> Tree {
    let mut tree = Tree::new();
    for _ in 0..n {
        tree.add_child(tree.root(), None, None);
    }
    tree
}

fn yule_harding<R: Rng>(n: usize, rng: &mut R) -> Tree {
    let mut tree = Tree::new();
    let root = tree.root();
    let mut leaves = vec![tree.add_child(root, None, None), tree.add_child(root, None, None)];
    while leaves.len() < n {
        let pick = rng.random_range(0..leaves.len());
        let parent = leaves.swap_remove(pick);
        leaves.push(tree.add_child(parent, None, None));
        leaves.push(tree.add_child(parent, None, None));
    }
    tree
}

fn uniform<R: Rng>(n: usize, rng: &mut R) -> Tree {
    let mut tree = star(3);
    for _ in 3..n {
        let edges = tree.edges();
        let below = edges[rng.random_range(0..edges.len())];
        let middle = split_edge(&mut tree, below);
        tree.add_child(middle, None, None);
    }
    tree
}

/// Insert a new node on the edge above `below` and return it.
fn split_edge(tree: &mut Tree, below: NodeId) -> NodeId {
    let Some(parent) = tree.node(below).parent else {
        return below;
    };
    let middle = tree.add_child(parent, None, None);
    tree.node_mut(parent).children.retain(|&c| c != below);
    tree.node_mut(below).parent = Some(middle);
    tree.node_mut(middle).children.push(below);
    middle
}

fn caterpillar(n: usize) -> Tree {
    let mut tree = Tree::new();
    let mut spine = tree.root();
    for _ in 0..n - 2 {
        tree.add_child(spine, None, None);
        spine = tree.add_child(spine, None, None);
    }
    tree.add_child(spine, None, None);
    tree.add_child(spine, None, None);
    tree
}

fn balanced(n: usize) -> Tree {
    fn attach(tree: &mut Tree, parent: NodeId, size: usize) {
        if size == 1 {
            tree.add_child(parent, None, None);
            return;
        }
        let node = tree.add_child(parent, None, None);
        attach(tree, node, size / 2);
        attach(tree, node, size - size / 2);
    }
    let mut tree = Tree::new();
    let root = tree.root();
    attach(&mut tree, root, n / 2);
    attach(&mut tree, root, n - n / 2);
    tree
}

/// Forward simulation until `n` lineages are alive, restarting on
/// extinction; extinct lineages are removed afterwards.
fn birth_death<R: Rng>(n: usize, rng: &mut R) -> Tree {
    loop {
        let mut tree = Tree::new();
        let mut alive = vec![tree.root()];
        while !alive.is_empty() && alive.len() < n {
            let pick = rng.random_range(0..alive.len());
            let lineage = alive.swap_remove(pick);
            if rng.random::<f64>() < BIRTH_RATE / (BIRTH_RATE + DEATH_RATE) {
                alive.push(tree.add_child(lineage, None, None));
                alive.push(tree.add_child(lineage, None, None));
            }
        }
        if alive.len() < n {
            continue;
        }

        let mut is_alive = vec![false; tree.len()];
        alive.iter().for_each(|&id| is_alive[id] = true);
        for id in tree.postorder() {
            if tree.is_leaf(id) && !is_alive[id] {
                if let Some(p) = tree.node(id).parent {
                    tree.node_mut(p).children.retain(|&c| c != id);
                    tree.node_mut(id).parent = None;
                }
            }
        }
        tree.suppress_unary();
        return tree;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::to_newick;
    use std::collections::HashSet;

    fn cherries(tree: &Tree) -> usize {
        (0..tree.len())
            .filter(|&id| tree.node(id).children.iter().filter(|&&c| tree.is_leaf(c)).count() >= 2)
            .count()
    }

    fn assert_binary_unrooted(tree: &Tree) {
        assert_eq!(tree.node(tree.root()).children.len(), 3);
        for id in tree.internal_edges() {
            assert_eq!(tree.node(id).children.len(), 2);
        }
    }

    #[test]
    fn star_tree_with_seed_42() {
        let a: Vec<Tree> = generate_random_trees(5, TreeGenMode::StarTree, 1, 42).unwrap().collect();
        let b: Vec<Tree> = generate_random_trees(5, TreeGenMode::StarTree, 1, 42).unwrap().collect();
        assert_eq!(a.len(), 1);
        let tree = &a[0];
        let internal: Vec<NodeId> = (0..tree.len()).filter(|&id| !tree.is_leaf(id)).collect();
        assert_eq!(internal.len(), 1);
        assert_eq!(tree.node(internal[0]).children.len(), 5);
        assert_eq!(to_newick(&a[0]), to_newick(&b[0]));
    }

    #[test]
    fn every_mode_yields_named_leaves_and_bounded_lengths() {
        for mode in TreeGenMode::ALL {
            for tree in generate_random_trees(9, mode, 5, 11).unwrap() {
                let names: HashSet<String> = tree.leaf_names().into_iter().collect();
                let expected: HashSet<String> = (1..=9).map(|i| format!("T{i}")).collect();
                assert_eq!(names, expected, "{mode}");
                for id in tree.edges() {
                    let t = tree.branch_length(id);
                    assert!((MIN_RANDOM_BRANCH..=MAX_RANDOM_BRANCH).contains(&t));
                }
                if mode != TreeGenMode::StarTree {
                    assert_binary_unrooted(&tree);
                }
            }
        }
    }

    #[test]
    fn shapes() {
        let cat = generate_random_trees(8, TreeGenMode::Caterpillar, 1, 3).unwrap().next().unwrap();
        assert_eq!(cherries(&cat), 2);
        let bal = generate_random_trees(8, TreeGenMode::Balanced, 1, 3).unwrap().next().unwrap();
        assert_eq!(cherries(&bal), 4);
    }

    #[test]
    fn seeds_are_reproducible() {
        let a: Vec<String> = generate_random_trees(12, TreeGenMode::Uniform, 4, 99).unwrap().map(|t| to_newick(&t)).collect();
        let b: Vec<String> = generate_random_trees(12, TreeGenMode::Uniform, 4, 99).unwrap().map(|t| to_newick(&t)).collect();
        let c: Vec<String> = generate_random_trees(12, TreeGenMode::Uniform, 4, 100).unwrap().map(|t| to_newick(&t)).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn restart_and_clone_replay() {
        let mut trees = generate_random_trees(6, TreeGenMode::YuleHarding, 3, 5).unwrap();
        assert_eq!(trees.len(), 3);
        let first = trees.next().map(|t| to_newick(&t));
        let snapshot = trees.clone();
        let rest: Vec<String> = trees.by_ref().map(|t| to_newick(&t)).collect();
        let replay: Vec<String> = snapshot.map(|t| to_newick(&t)).collect();
        assert_eq!(rest, replay);
        assert!(trees.next().is_none());
        trees.restart();
        assert_eq!(trees.next().map(|t| to_newick(&t)), first);
    }

    #[test]
    fn relabels_with_given_taxa() {
        let taxa: Vec<String> = ["ant", "bee", "cat", "dog"].iter().map(|s| s.to_string()).collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let tree = random_tree_for_taxa(&taxa, TreeGenMode::Uniform, &mut rng).unwrap();
        assert_eq!(tree.sorted_taxa().unwrap(), taxa);
    }

    #[test]
    fn zero_seed_picks_a_fresh_one() {
        let trees = generate_random_trees(4, TreeGenMode::Uniform, 1, 0).unwrap();
        assert_ne!(trees.seed(), 0);
    }

    #[test]
    fn validation() {
        assert!(matches!(
            generate_random_trees(2, TreeGenMode::Uniform, 1, 1),
            Err(PhyloError::DegenerateInput(_))
        ));
        assert!(matches!("SIDEWAYS".parse::<TreeGenMode>(), Err(PhyloError::Configuration(_))));
        assert_eq!("birth_death".parse::<TreeGenMode>().unwrap(), TreeGenMode::BirthDeath);
    }
}
