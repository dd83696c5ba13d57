//! Felsenstein pruning over compressed site patterns.
//!
//! Partial likelihood vectors are stored flat as
//! `values[(category * patterns + pattern) * states + state]` with one log
//! scale factor per pattern, so deep or large trees do not underflow. The
//! invariant-sites component is mixed in on the log scale at the end:
//!
//! ```text
//! L(site) = (1 - p_inv) · Σ_c w_c L_c(site)  +  p_inv · Σ_{s constant} π_s
//! ```
//!
//! Branch lengths are optimised one edge at a time with exact "outside"
//! vectors, so every evaluation of a candidate length costs a single pass
//! over the patterns instead of a full tree traversal.

use crate::alignment::Alignment;
use crate::error::{PhyloError, Result};
use crate::model::ModelParameters;
use crate::optimize::brent_minimize;
use crate::rates::SiteRates;
use crate::subst::RateMatrix;
use crate::tree::{NodeId, Tree};
use std::collections::HashMap;

pub const MIN_BRANCH_LENGTH: f64 = 1e-6;
pub const MAX_BRANCH_LENGTH: f64 = 10.0;

const BRANCH_TOLERANCE: f64 = 1e-4;
const PARAM_TOLERANCE: f64 = 1e-3;
const BRENT_ITERATIONS: usize = 50;

/// Alignment columns prepared for likelihood evaluation.
#[derive(Debug, Clone)]
pub struct LikelihoodData {
    taxa: Vec<String>,
    num_states: usize,
    weights: Vec<f64>,
    /// Per taxon, flat `pattern * k + state` indicator of compatible states.
    tips: Vec<Vec<f64>>,
    /// States shared by every residue of a pattern; empty for variable ones.
    constant: Vec<Vec<usize>>,
}

impl LikelihoodData {
    pub fn new(alignment: &Alignment) -> Self {
        let patterns = alignment.patterns();
        let seq_type = alignment.seq_type();
        let k = seq_type.num_states();
        let tips = (0..alignment.len())
            .map(|taxon| {
                let mut tip = vec![0.0; patterns.len() * k];
                for (p, column) in patterns.columns.iter().enumerate() {
                    let states = seq_type.compatible_states(column[taxon]).unwrap_or_else(|| (0..k).collect());
                    for s in states {
                        tip[p * k + s] = 1.0;
                    }
                }
                tip
            })
            .collect();
        let constant = (0..patterns.len()).map(|p| patterns.constant_state(p).unwrap_or_default()).collect();
        LikelihoodData {
            taxa: alignment.names().to_vec(),
            num_states: k,
            weights: patterns.weights,
            tips,
            constant,
        }
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn num_patterns(&self) -> usize {
        self.weights.len()
    }

    /// Number of alignment columns represented.
    pub fn num_sites(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Alignment row of every leaf, indexed by node id.
    ///
    /// # Errors
    /// [`PhyloError::Validation`] unless the leaf names are exactly the
    /// alignment's taxa.
    fn leaf_taxa(&self, tree: &Tree) -> Result<Vec<Option<usize>>> {
        let index: HashMap<&str, usize> = self.taxa.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let mut map = vec![None; tree.len()];
        let mut seen = vec![false; self.taxa.len()];
        for leaf in tree.leaves() {
            let name = tree.node(leaf).name.as_deref().unwrap_or_default();
            let Some(&t) = index.get(name) else {
                return Err(PhyloError::Validation(format!("tree leaf '{name}' is not in the alignment")));
            };
            if seen[t] {
                return Err(PhyloError::Validation(format!("taxon '{name}' appears twice in the tree")));
            }
            seen[t] = true;
            map[leaf] = Some(t);
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(PhyloError::Validation(format!(
                "alignment taxon '{}' is missing from the tree",
                self.taxa[missing]
            )));
        }
        Ok(map)
    }

    /// Log-likelihood of `tree` under `params`.
    pub fn log_likelihood(&self, tree: &Tree, params: &ModelParameters) -> Result<f64> {
        let mut eval = Evaluator::new(self, tree, params)?;
        eval.compute_all_down(tree);
        Ok(eval.root_log_likelihood(tree))
    }

    /// Run `passes` sweeps of per-edge optimisation and return the final
    /// log-likelihood. Lengths are kept in `[MIN_BRANCH_LENGTH, MAX_BRANCH_LENGTH]`.
    pub fn optimize_branch_lengths(&self, tree: &mut Tree, params: &ModelParameters, passes: usize) -> Result<f64> {
        for id in tree.edges() {
            let t = tree.branch_length(id).clamp(MIN_BRANCH_LENGTH, MAX_BRANCH_LENGTH);
            tree.set_branch_length(id, t);
        }
        let mut eval = Evaluator::new(self, tree, params)?;
        eval.compute_all_down(tree);
        let mut lnl = eval.root_log_likelihood(tree);
        for _ in 0..passes {
            let before = lnl;
            let root = tree.root();
            let base = eval.stationary();
            eval.optimize_children(tree, root, base);
            eval.compute_down(tree, root);
            lnl = eval.root_log_likelihood(tree);
            if lnl - before < BRANCH_TOLERANCE {
                break;
            }
        }
        Ok(lnl)
    }

    /// One coordinate-wise pass over the free model parameters.
    pub fn optimize_parameters(&self, tree: &Tree, params: &mut ModelParameters) -> Result<f64> {
        let mut lnl = self.log_likelihood(tree, params)?;
        for coord in params.coordinates() {
            let (lo, hi) = params.bounds(coord);
            let start = params.get(coord);
            let (x, fx) = brent_minimize(
                |x| {
                    let mut trial = params.clone();
                    trial.set(coord, x);
                    match self.log_likelihood(tree, &trial) {
                        Ok(l) if l.is_finite() => -l,
                        _ => f64::INFINITY,
                    }
                },
                lo,
                hi,
                start,
                PARAM_TOLERANCE,
                BRENT_ITERATIONS,
            );
            if -fx >= lnl {
                params.set(coord, x);
                lnl = -fx;
            }
        }
        Ok(lnl)
    }

    /// Alternate branch-length and parameter optimisation until a round
    /// gains less than `options.tolerance`.
    pub fn optimize_all(&self, tree: &mut Tree, params: &mut ModelParameters, options: &FitOptions) -> Result<f64> {
        let mut lnl = self.log_likelihood(tree, params)?;
        for round in 0..options.max_rounds.max(1) {
            let before = lnl;
            lnl = self.optimize_branch_lengths(tree, params, options.branch_passes)?;
            if options.optimize_model && !params.coordinates().is_empty() {
                lnl = self.optimize_parameters(tree, params)?;
            }
            log::trace!("optimisation round {round}: lnL {lnl:.6}");
            if lnl - before < options.tolerance {
                break;
            }
        }
        params.sort_free_rates();
        Ok(lnl)
    }
}

/// Settings for [`LikelihoodData::optimize_all`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub tolerance: f64,
    pub max_rounds: usize,
    /// Branch sweeps per round.
    pub branch_passes: usize,
    pub optimize_model: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions { tolerance: 1e-3, max_rounds: 20, branch_passes: 2, optimize_model: true }
    }
}

#[derive(Debug, Clone, Default)]
struct Partial {
    values: Vec<f64>,
    /// Log scale factor per pattern.
    scale: Vec<f64>,
}

struct Evaluator<'a> {
    data: &'a LikelihoodData,
    matrix: RateMatrix,
    rates: SiteRates,
    /// `Σ π_s` over the constant states of each pattern.
    const_prob: Vec<f64>,
    leaf_taxon: Vec<Option<usize>>,
    down: Vec<Partial>,
}

impl<'a> Evaluator<'a> {
    fn new(data: &'a LikelihoodData, tree: &Tree, params: &ModelParameters) -> Result<Self> {
        let leaf_taxon = data.leaf_taxa(tree)?;
        let matrix = RateMatrix::new(&params.exchangeabilities(), &params.freqs)?;
        let const_prob = data
            .constant
            .iter()
            .map(|states| states.iter().map(|&s| params.freqs[s]).sum())
            .collect();
        Ok(Evaluator {
            data,
            matrix,
            rates: params.site_rates(),
            const_prob,
            leaf_taxon,
            down: vec![Partial::default(); tree.len()],
        })
    }

    fn block(&self) -> usize {
        self.data.num_patterns() * self.data.num_states
    }

    /// Transition matrices of one branch, one per rate category.
    fn pmats(&self, t: f64) -> Vec<Vec<f64>> {
        self.rates
            .categories
            .iter()
            .map(|c| self.matrix.transition_matrix(t * c.rate))
            .collect()
    }

    /// Stationary frequencies tiled over categories and patterns.
    fn stationary(&self) -> Partial {
        let freqs = self.matrix.freqs();
        let n = self.rates.len() * self.data.num_patterns();
        Partial {
            values: (0..n).flat_map(|_| freqs.iter().copied()).collect(),
            scale: vec![0.0; self.data.num_patterns()],
        }
    }

    fn compute_all_down(&mut self, tree: &Tree) {
        for id in tree.postorder() {
            self.compute_down(tree, id);
        }
    }

    fn compute_down(&mut self, tree: &Tree, id: NodeId) {
        let node = tree.node(id);
        if node.is_leaf() {
            let block = self.block();
            let values = match self.leaf_taxon[id] {
                Some(t) => self.data.tips[t].repeat(self.rates.len()),
                None => vec![1.0; block * self.rates.len()],
            };
            self.down[id] = Partial { values, scale: vec![0.0; self.data.num_patterns()] };
            return;
        }
        let mut acc = Partial {
            values: vec![1.0; self.block() * self.rates.len()],
            scale: vec![0.0; self.data.num_patterns()],
        };
        for &c in &node.children {
            let msg = self.toward_parent(&self.pmats(tree.branch_length(c)), &self.down[c]);
            multiply_into(&mut acc, &msg);
        }
        self.rescale(&mut acc);
        self.down[id] = acc;
    }

    /// `out[i] = Σ_j P(i, j) x[j]`: a child's subtree seen from its parent.
    fn toward_parent(&self, pmats: &[Vec<f64>], x: &Partial) -> Partial {
        let k = self.data.num_states;
        let mut values = vec![0.0; x.values.len()];
        for (c, pm) in pmats.iter().enumerate() {
            let offset = c * self.block();
            for p in 0..self.data.num_patterns() {
                let base = offset + p * k;
                let xs = &x.values[base..base + k];
                for i in 0..k {
                    values[base + i] = pm[k * i..k * i + k].iter().zip(xs).map(|(a, b)| a * b).sum();
                }
            }
        }
        Partial { values, scale: x.scale.clone() }
    }

    /// `out[j] = Σ_i a[i] P(i, j)`: the rest of the tree seen from a child.
    fn toward_child(&self, pmats: &[Vec<f64>], a: &Partial) -> Partial {
        let k = self.data.num_states;
        let mut values = vec![0.0; a.values.len()];
        for (c, pm) in pmats.iter().enumerate() {
            let offset = c * self.block();
            for p in 0..self.data.num_patterns() {
                let base = offset + p * k;
                for i in 0..k {
                    let ai = a.values[base + i];
                    if ai == 0.0 {
                        continue;
                    }
                    for j in 0..k {
                        values[base + j] += ai * pm[k * i + j];
                    }
                }
            }
        }
        Partial { values, scale: a.scale.clone() }
    }

    /// Divide each pattern by its largest entry, moving the factor into the scale.
    fn rescale(&self, part: &mut Partial) {
        let k = self.data.num_states;
        let np = self.data.num_patterns();
        for p in 0..np {
            let mut max = 0.0f64;
            for c in 0..self.rates.len() {
                let base = (c * np + p) * k;
                max = part.values[base..base + k].iter().fold(max, |m, v| m.max(*v));
            }
            if max > 0.0 && max != 1.0 {
                for c in 0..self.rates.len() {
                    let base = (c * np + p) * k;
                    part.values[base..base + k].iter_mut().for_each(|v| *v /= max);
                }
                part.scale[p] += max.ln();
            }
        }
    }

    /// Site log-likelihood from the variable-sites sum and its log scale.
    fn site_log_likelihood(&self, pattern: usize, variable: f64, log_scale: f64) -> f64 {
        let lv = if variable > 0.0 { variable.ln() + log_scale } else { f64::NEG_INFINITY };
        let p_inv = self.rates.p_invar;
        if p_inv <= 0.0 {
            return lv;
        }
        let a = (1.0 - p_inv).ln() + lv;
        let c = self.const_prob[pattern];
        if c <= 0.0 {
            return a;
        }
        log_add_exp(a, (p_inv * c).ln())
    }

    fn root_log_likelihood(&self, tree: &Tree) -> f64 {
        let root = &self.down[tree.root()];
        let k = self.data.num_states;
        let np = self.data.num_patterns();
        let freqs = self.matrix.freqs();
        (0..np)
            .map(|p| {
                let variable: f64 = self
                    .rates
                    .categories
                    .iter()
                    .enumerate()
                    .map(|(c, cat)| {
                        let base = (c * np + p) * k;
                        cat.weight * freqs.iter().zip(&root.values[base..base + k]).map(|(f, v)| f * v).sum::<f64>()
                    })
                    .sum();
                self.data.weights[p] * self.site_log_likelihood(p, variable, root.scale[p])
            })
            .sum()
    }

    /// Log-likelihood through one edge, given the outside vector at its
    /// upper end and the subtree vector at its lower end.
    fn edge_log_likelihood(&self, outside: &Partial, below: &Partial, pmats: &[Vec<f64>]) -> f64 {
        let k = self.data.num_states;
        let np = self.data.num_patterns();
        (0..np)
            .map(|p| {
                let mut variable = 0.0;
                for (c, (cat, pm)) in self.rates.categories.iter().zip(pmats).enumerate() {
                    let base = (c * np + p) * k;
                    let xs = &below.values[base..base + k];
                    let mut sum = 0.0;
                    for i in 0..k {
                        let ai = outside.values[base + i];
                        if ai == 0.0 {
                            continue;
                        }
                        sum += ai * pm[k * i..k * i + k].iter().zip(xs).map(|(a, b)| a * b).sum::<f64>();
                    }
                    variable += cat.weight * sum;
                }
                let scale = outside.scale[p] + below.scale[p];
                self.data.weights[p] * self.site_log_likelihood(p, variable, scale)
            })
            .sum()
    }

    /// Optimise every edge below `v`, given the message `into_v` arriving at
    /// `v` from the rest of the tree. Subtree vectors are refreshed on the
    /// way back up.
    fn optimize_children(&mut self, tree: &mut Tree, v: NodeId, into_v: Partial) {
        let children = tree.node(v).children.clone();
        for &c in &children {
            let mut outside = into_v.clone();
            for &s in children.iter().filter(|&&s| s != c) {
                let msg = self.toward_parent(&self.pmats(tree.branch_length(s)), &self.down[s]);
                multiply_into(&mut outside, &msg);
            }
            self.rescale(&mut outside);

            let below = &self.down[c];
            let (t, _) = brent_minimize(
                |t| -self.edge_log_likelihood(&outside, below, &self.pmats(t)),
                MIN_BRANCH_LENGTH,
                MAX_BRANCH_LENGTH,
                tree.branch_length(c),
                BRANCH_TOLERANCE,
                BRENT_ITERATIONS,
            );
            tree.set_branch_length(c, t);

            if !tree.is_leaf(c) {
                let mut into_c = self.toward_child(&self.pmats(t), &outside);
                self.rescale(&mut into_c);
                self.optimize_children(tree, c, into_c);
                self.compute_down(tree, c);
            }
        }
    }
}

fn multiply_into(acc: &mut Partial, other: &Partial) {
    acc.values.iter_mut().zip(&other.values).for_each(|(a, b)| *a *= b);
    acc.scale.iter_mut().zip(&other.scale).for_each(|(a, b)| *a += b);
}

fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}
