//! Neighbour-joining tree construction.
//!
//! Classical NJ repeatedly joins the pair of active clusters minimising
//!
//! ```text
//! Q(i, j) = (r - 2) d(i, j) - R(i) - R(j),    R(i) = Σ_k d(i, k)
//! ```
//!
//! where `r` is the number of active clusters. The joined cluster takes the
//! lower of the two slots; ties go to the lexicographically smallest `(i, j)`.
//!
//! The default [`NjSearch::Rapid`] selector keeps each row's candidates sorted
//! by distance and stops scanning a row once the lower bound
//! `(r - 2) d(i, j) - R(i) - max R` exceeds the best Q found so far. The bound
//! never discards the true minimum, so both selectors join the same pairs and
//! produce identical trees.

use crate::distance::DistanceMatrix;
use crate::error::{PhyloError, Result};
use crate::tree::{NodeId, Tree};

/// Pair selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NjSearch {
    /// Sorted rows with lower-bound pruning.
    #[default]
    Rapid,
    /// Evaluate every active pair.
    Exhaustive,
}

/// Neighbour-joining tree from a distance matrix.
pub fn nj_from_matrix(matrix: &DistanceMatrix) -> Result<Tree> {
    build_nj_tree(matrix.names(), matrix.values())
}

/// Neighbour-joining tree from names and a flat `n*i+j` distance array.
///
/// For `n >= 3` the result is unrooted, with a trifurcating root.
///
/// # Errors
/// - [`PhyloError::Validation`] if `distances.len() != n²` or a value is not finite
/// - [`PhyloError::DegenerateInput`] for fewer than two names
pub fn build_nj_tree(names: &[String], distances: &[f64]) -> Result<Tree> {
    build_nj_tree_with(names, distances, NjSearch::Rapid)
}

pub fn build_nj_tree_with(names: &[String], distances: &[f64], search: NjSearch) -> Result<Tree> {
    let n = names.len();
    if distances.len() != n * n {
        return Err(PhyloError::Validation(format!(
            "{n} names need {} distances, got {}",
            n * n,
            distances.len()
        )));
    }
    if n < 2 {
        return Err(PhyloError::DegenerateInput(format!(
            "neighbour joining needs at least 2 taxa, got {n}"
        )));
    }
    if let Some(bad) = distances.iter().find(|d| !d.is_finite()) {
        return Err(PhyloError::Validation(format!("distance {bad} is not finite")));
    }

    let mut state = NjState::new(names, distances);
    while state.active_count() > 2 {
        let (i, j) = match search {
            NjSearch::Rapid => state.select_rapid(),
            NjSearch::Exhaustive => state.select_exhaustive(),
        };
        state.join(i, j);
    }
    Ok(state.finish())
}

/// Cluster being assembled: a leaf name or joined children with branch lengths.
struct Pending {
    name: Option<String>,
    children: Vec<(usize, f64)>,
}

/// Candidate entry of a sorted row: distance, partner slot, partner generation.
#[derive(Clone, Copy)]
struct Candidate {
    d: f64,
    slot: usize,
    generation: u32,
}

struct NjState {
    n: usize,
    dist: Vec<f64>,
    active: Vec<bool>,
    /// Incremented whenever a slot receives a newly joined cluster.
    generation: Vec<u32>,
    r_sum: Vec<f64>,
    /// Pending index held by each slot.
    cluster: Vec<usize>,
    pending: Vec<Pending>,
    rows: Vec<Vec<Candidate>>,
    remaining: usize,
}

impl NjState {
    fn new(names: &[String], distances: &[f64]) -> Self {
        let n = names.len();
        let mut dist = vec![0.0; n * n];
        for i in 0..n {
            for j in i + 1..n {
                let d = distances[n * i + j];
                dist[n * i + j] = d;
                dist[n * j + i] = d;
            }
        }
        let mut r_sum = vec![0.0; n];
        for (i, r) in r_sum.iter_mut().enumerate() {
            *r = (0..n).map(|k| dist[n * i + k]).sum();
        }
        let pending = names
            .iter()
            .map(|name| Pending { name: Some(name.clone()), children: Vec::new() })
            .collect();

        let mut state = NjState {
            n,
            dist,
            active: vec![true; n],
            generation: vec![0; n],
            r_sum,
            cluster: (0..n).collect(),
            pending,
            rows: vec![Vec::new(); n],
            remaining: n,
        };
        for i in 0..n {
            state.rebuild_row(i);
        }
        state
    }

    fn active_count(&self) -> usize {
        self.remaining
    }

    #[inline]
    fn d(&self, i: usize, j: usize) -> f64 {
        self.dist[self.n * i + j]
    }

    /// Q of a pair, always evaluated in `(min, max)` slot order so that every
    /// selector computes bit-identical values.
    #[inline]
    fn q(&self, i: usize, j: usize) -> f64 {
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        (self.remaining as f64 - 2.0) * self.d(a, b) - self.r_sum[a] - self.r_sum[b]
    }

    fn rebuild_row(&mut self, i: usize) {
        let mut row: Vec<Candidate> = (0..self.n)
            .filter(|&k| k != i && self.active[k])
            .map(|k| Candidate { d: self.d(i, k), slot: k, generation: self.generation[k] })
            .collect();
        row.sort_by(|x, y| x.d.total_cmp(&y.d).then(x.slot.cmp(&y.slot)));
        self.rows[i] = row;
    }

    fn select_exhaustive(&self) -> (usize, usize) {
        let mut best: Option<(f64, usize, usize)> = None;
        for i in 0..self.n {
            if !self.active[i] {
                continue;
            }
            for j in i + 1..self.n {
                if !self.active[j] {
                    continue;
                }
                let q = self.q(i, j);
                if better(q, i, j, best) {
                    best = Some((q, i, j));
                }
            }
        }
        best.map(|(_, i, j)| (i, j)).unwrap_or((0, 1))
    }

    fn select_rapid(&self) -> (usize, usize) {
        let r_max = (0..self.n)
            .filter(|&k| self.active[k])
            .map(|k| self.r_sum[k])
            .fold(f64::NEG_INFINITY, f64::max);
        let factor = self.remaining as f64 - 2.0;

        let mut best: Option<(f64, usize, usize)> = None;
        for i in 0..self.n {
            if !self.active[i] {
                continue;
            }
            for c in &self.rows[i] {
                if let Some((best_q, _, _)) = best {
                    let bound = factor * c.d - self.r_sum[i] - r_max;
                    let slack = 1e-9 * best_q.abs().max(1.0);
                    if bound > best_q + slack {
                        break;
                    }
                }
                if !self.active[c.slot] || self.generation[c.slot] != c.generation {
                    continue;
                }
                let (a, b) = if i < c.slot { (i, c.slot) } else { (c.slot, i) };
                let q = self.q(a, b);
                if better(q, a, b, best) {
                    best = Some((q, a, b));
                }
            }
        }
        best.map(|(_, i, j)| (i, j)).unwrap_or((0, 1))
    }

    /// Join slots `i < j` into slot `i`.
    fn join(&mut self, i: usize, j: usize) {
        let r = self.remaining as f64;
        let dij = self.d(i, j);
        let bi = 0.5 * dij + (self.r_sum[i] - self.r_sum[j]) / (2.0 * (r - 2.0));
        let bj = dij - bi;

        let node = self.pending.len();
        self.pending.push(Pending {
            name: None,
            children: vec![(self.cluster[i], bi.max(0.0)), (self.cluster[j], bj.max(0.0))],
        });

        self.active[j] = false;
        self.remaining -= 1;
        for k in 0..self.n {
            if !self.active[k] || k == i {
                continue;
            }
            let dik = self.d(i, k);
            let djk = self.d(j, k);
            let dnew = 0.5 * (dik + djk - dij);
            self.r_sum[k] += dnew - dik - djk;
            self.dist[self.n * i + k] = dnew;
            self.dist[self.n * k + i] = dnew;
        }
        self.r_sum[i] = (0..self.n)
            .filter(|&k| self.active[k] && k != i)
            .map(|k| self.d(i, k))
            .sum();
        self.cluster[i] = node;
        self.generation[i] += 1;
        self.rows[j].clear();
        self.rebuild_row(i);
    }

    fn finish(self) -> Tree {
        let mut slots = (0..self.n).filter(|&k| self.active[k]);
        let (a, b) = match (slots.next(), slots.next()) {
            (Some(a), Some(b)) => (a, b),
            _ => (0, 1),
        };
        let d = self.d(a, b).max(0.0);
        let (ca, cb) = (self.cluster[a], self.cluster[b]);
        let pending = self.pending;

        let mut tree = Tree::new();
        let root = tree.root();
        if !pending[ca].children.is_empty() || !pending[cb].children.is_empty() {
            let (inner, outer) = if !pending[ca].children.is_empty() { (ca, cb) } else { (cb, ca) };
            attach_children(&mut tree, root, inner, &pending);
            let id = tree.add_child(root, pending[outer].name.clone(), Some(d));
            attach_children(&mut tree, id, outer, &pending);
        } else {
            tree.add_child(root, pending[ca].name.clone(), Some(d / 2.0));
            tree.add_child(root, pending[cb].name.clone(), Some(d / 2.0));
        }
        tree
    }
}

fn attach_children(tree: &mut Tree, at: NodeId, cluster: usize, pending: &[Pending]) {
    let mut stack = vec![(at, cluster)];
    while let Some((node, c)) = stack.pop() {
        for &(child, len) in &pending[c].children {
            let id = tree.add_child(node, pending[child].name.clone(), Some(len));
            stack.push((id, child));
        }
    }
}

#[inline]
fn better(q: f64, i: usize, j: usize, best: Option<(f64, usize, usize)>) -> bool {
    match best {
        None => true,
        Some((bq, bi, bj)) => q < bq || (q == bq && (i, j) < (bi, bj)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::robinson_foulds;
    use crate::newick::{parse_newick, to_newick};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("t{i}")).collect()
    }

    /// Path-length distances between leaves of a tree.
    fn patristic(tree: &Tree, taxa: &[String]) -> Vec<f64> {
        let n = taxa.len();
        let leaf_ids: Vec<NodeId> = taxa.iter().map(|t| tree.find_leaf(t).unwrap()).collect();
        let path_to_root = |mut v: NodeId| {
            let mut path = vec![(v, 0.0)];
            let mut acc = 0.0;
            while let Some(p) = tree.node(v).parent {
                acc += tree.branch_length(v);
                path.push((p, acc));
                v = p;
            }
            path
        };
        let mut out = vec![0.0; n * n];
        for i in 0..n {
            let pi = path_to_root(leaf_ids[i]);
            for j in 0..n {
                let pj = path_to_root(leaf_ids[j]);
                let mut best = f64::INFINITY;
                for &(a, da) in &pi {
                    if let Some(&(_, db)) = pj.iter().find(|(b, _)| *b == a) {
                        best = best.min(da + db);
                    }
                }
                out[n * i + j] = best;
            }
        }
        out
    }

    #[test]
    fn three_taxa_branch_lengths() {
        // d(a,b)=3, d(a,c)=4, d(b,c)=5 → a=1, b=2, c=3.
        let t = build_nj_tree(&names(3), &[0., 3., 4., 3., 0., 5., 4., 5., 0.]).unwrap();
        assert_eq!(t.num_leaves(), 3);
        for (name, len) in [("t0", 1.0), ("t1", 2.0), ("t2", 3.0)] {
            let id = t.find_leaf(name).unwrap();
            assert!((t.branch_length(id) - len).abs() <= 1e-12);
        }
    }

    #[test]
    fn two_taxa_split_distance() {
        let t = build_nj_tree(&names(2), &[0.0, 0.4, 0.4, 0.0]).unwrap();
        assert_eq!(t.num_leaves(), 2);
        assert!((t.total_length() - 0.4).abs() <= 1e-12);
    }

    #[test]
    fn recovers_additive_tree() {
        let truth =
            parse_newick("((t0:0.1,t1:0.2):0.05,(t2:0.3,(t3:0.1,t4:0.15):0.07):0.04,t5:0.2);").unwrap();
        let taxa = names(6);
        let d = patristic(&truth, &taxa);
        let built = build_nj_tree(&taxa, &d).unwrap();
        assert_eq!(robinson_foulds(&truth, &built).unwrap(), 0);
        assert!((built.total_length() - truth.total_length()).abs() <= 1e-9);
        let again = patristic(&built, &taxa);
        for (x, y) in d.iter().zip(&again) {
            assert!((x - y).abs() <= 1e-9);
        }
    }

    #[test]
    fn rapid_matches_exhaustive_on_random_matrices() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        for n in [3usize, 4, 7, 12, 25] {
            for _ in 0..5 {
                let mut d = vec![0.0; n * n];
                for i in 0..n {
                    for j in i + 1..n {
                        let v: f64 = rng.random_range(0.01..1.0);
                        d[n * i + j] = v;
                        d[n * j + i] = v;
                    }
                }
                let a = build_nj_tree_with(&names(n), &d, NjSearch::Rapid).unwrap();
                let b = build_nj_tree_with(&names(n), &d, NjSearch::Exhaustive).unwrap();
                assert_eq!(to_newick(&a), to_newick(&b));
            }
        }
    }

    #[test]
    fn ties_resolve_to_first_pair() {
        // All pairs equal: the first join must be (t0, t1).
        let n = 4;
        let mut d = vec![1.0; n * n];
        for i in 0..n {
            d[n * i + i] = 0.0;
        }
        let a = build_nj_tree_with(&names(n), &d, NjSearch::Rapid).unwrap();
        let b = build_nj_tree_with(&names(n), &d, NjSearch::Exhaustive).unwrap();
        assert_eq!(to_newick(&a), to_newick(&b));
        let root = a.root();
        let first = a.node(root).children[0];
        let leaves: Vec<_> = a.node(first).children.iter().map(|&c| a.node(c).name.clone().unwrap()).collect();
        assert_eq!(leaves, vec!["t0", "t1"]);
    }

    #[test]
    fn unrooted_result_has_trifurcating_root() {
        let n = 5;
        let mut d = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    d[n * i + j] = (i + j) as f64 * 0.1;
                }
            }
        }
        let t = build_nj_tree(&names(n), &d).unwrap();
        assert_eq!(t.node(t.root()).children.len(), 3);
        assert_eq!(t.num_leaves(), 5);
    }

    #[test]
    fn input_validation() {
        assert!(matches!(build_nj_tree(&names(3), &[0.0; 4]), Err(PhyloError::Validation(_))));
        assert!(matches!(build_nj_tree(&names(1), &[0.0]), Err(PhyloError::DegenerateInput(_))));
        let mut d = vec![0.0; 9];
        d[1] = f64::NAN;
        assert!(matches!(build_nj_tree(&names(3), &d), Err(PhyloError::Validation(_))));
    }
}
