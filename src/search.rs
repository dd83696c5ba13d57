//! Maximum-likelihood tree search and fixed-topology fitting.
//!
//! A search walks through
//!
//! ```text
//! INITIALIZED → OPTIMIZING_BRANCHES ⇄ REARRANGING_TOPOLOGY → CONVERGED
//!                                                          ↘ BUDGET_EXHAUSTED
//! ```
//!
//! Starting trees (neighbour joining on JC distances plus a few uniform
//! random trees) are optimised and NNI hill-climbed; the best one becomes the
//! incumbent. Each following round perturbs the incumbent with random NNIs,
//! climbs again and keeps the result if it improves the log-likelihood by
//! more than the tolerance. The search stops once `unsuccessful_stop` rounds
//! in a row fail to improve, or when `max_iterations` rounds have run.

use crate::alignment::Alignment;
use crate::bootstrap;
use crate::distance::{self, JukesCantor};
use crate::error::{PhyloError, Result};
use crate::likelihood::{FitOptions, LikelihoodData};
use crate::model::{Model, ModelParameters};
use crate::newick::{parse_newick, to_newick};
use crate::nj::nj_from_matrix;
use crate::random::{self, TreeGenMode};
use crate::report::{AnalysisResult, BranchSupport, ModelReport, SearchStatus};
use crate::tree::Tree;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Starting length for edges a user tree leaves unspecified.
pub const DEFAULT_BRANCH_LENGTH: f64 = 0.1;

/// Options shared by tree building and fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Random seed; `0` draws a fresh one.
    pub seed: u64,
    /// Worker threads for bootstrap replicates; `0` uses every core.
    pub threads: usize,
    pub bootstrap_replicates: usize,
    /// Perturbation rounds before the search gives up.
    pub max_iterations: usize,
    /// Consecutive rounds without improvement that count as convergence.
    pub unsuccessful_stop: usize,
    /// Uniform random starting trees besides the NJ tree.
    pub random_starts: usize,
    /// Fraction of internal branches hit by random NNIs per round.
    pub perturbation_strength: f64,
    /// Minimum log-likelihood gain that counts as an improvement.
    pub tolerance: f64,
    /// Rounds of alternating branch / parameter optimisation per fit.
    pub max_branch_rounds: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            seed: 0,
            threads: 1,
            bootstrap_replicates: 0,
            max_iterations: 100,
            unsuccessful_stop: 20,
            random_starts: 2,
            perturbation_strength: 0.5,
            tolerance: 1e-3,
            max_branch_rounds: 20,
        }
    }
}

impl SearchConfig {
    /// # Errors
    /// [`PhyloError::Configuration`] for a non-positive tolerance or a
    /// perturbation strength outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(PhyloError::Configuration(format!("tolerance must be positive, got {}", self.tolerance)));
        }
        if !(self.perturbation_strength > 0.0 && self.perturbation_strength <= 1.0) {
            return Err(PhyloError::Configuration(format!(
                "perturbation strength must lie in (0, 1], got {}",
                self.perturbation_strength
            )));
        }
        Ok(())
    }

    fn fit_options(&self) -> FitOptions {
        FitOptions { tolerance: self.tolerance, max_rounds: self.max_branch_rounds.max(1), ..FitOptions::default() }
    }

    /// Seed to use, drawing a fresh one for `0`.
    pub fn resolve_seed(&self) -> u64 {
        if self.seed == 0 { random::fresh_seed() } else { self.seed }
    }
}

/// A tree inference strategy.
pub trait TreeSearcher {
    /// Infer a tree and model parameters from scratch.
    fn search(&self, alignment: &Alignment, model: &Model) -> Result<AnalysisResult>;

    /// Fit branch lengths and model parameters on a fixed topology.
    fn fit(&self, alignment: &Alignment, model: &Model, newick: &str) -> Result<AnalysisResult>;
}

/// Maximum-likelihood search with NNI hill climbing and random perturbation.
#[derive(Debug, Clone, Default)]
pub struct MlSearch {
    pub config: SearchConfig,
}

impl MlSearch {
    pub fn new(config: SearchConfig) -> Self {
        MlSearch { config }
    }
}

impl TreeSearcher for MlSearch {
    fn search(&self, alignment: &Alignment, model: &Model) -> Result<AnalysisResult> {
        self.config.validate()?;
        let seed = self.config.resolve_seed();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut outcome = search_ml(alignment, model, &self.config, &mut rng)?;
        log::info!(
            "search finished after {} rounds: lnL {:.4} ({:?})",
            outcome.iterations,
            outcome.log_likelihood,
            outcome.status
        );

        let support = if self.config.bootstrap_replicates > 0 {
            bootstrap::annotate_support(alignment, model, &self.config, &mut outcome.tree, &mut rng)?
        } else {
            Vec::new()
        };
        Ok(outcome.into_result(model, seed, support))
    }

    fn fit(&self, alignment: &Alignment, model: &Model, newick: &str) -> Result<AnalysisResult> {
        self.config.validate()?;
        model.check_seq_type(alignment.seq_type())?;
        let mut tree = parse_newick(newick)?;
        tree.unroot();
        tree.clear_internal_labels();
        tree.fill_missing_lengths(DEFAULT_BRANCH_LENGTH);

        let data = LikelihoodData::new(alignment);
        let mut params = ModelParameters::initial(*model, &alignment.state_frequencies());
        let log_likelihood = data.optimize_all(&mut tree, &mut params, &self.config.fit_options())?;
        log::info!("fitted {model} on a fixed topology: lnL {log_likelihood:.4}");

        let outcome = SearchOutcome { tree, params, log_likelihood, status: SearchStatus::Converged, iterations: 0 };
        Ok(outcome.into_result(model, self.config.resolve_seed(), Vec::new()))
    }
}

/// Infer a maximum-likelihood tree for `alignment` under `model`.
///
/// # Errors
/// - [`PhyloError::DegenerateInput`] for fewer than 3 taxa
/// - [`PhyloError::Configuration`] for a model of the wrong alphabet or bad settings
pub fn build_tree(alignment: &Alignment, model: &Model, config: &SearchConfig) -> Result<AnalysisResult> {
    MlSearch::new(config.clone()).search(alignment, model)
}

/// Fit branch lengths and model parameters to a fixed topology.
///
/// A bifurcating root is removed first. Edges without a length start at
/// [`DEFAULT_BRANCH_LENGTH`].
///
/// # Errors
/// - [`PhyloError::Parse`] for malformed Newick
/// - [`PhyloError::Validation`] if the leaves differ from the alignment taxa
pub fn fit_tree(alignment: &Alignment, model: &Model, newick: &str, config: &SearchConfig) -> Result<AnalysisResult> {
    MlSearch::new(config.clone()).fit(alignment, model, newick)
}

/// Best tree of one search, before reporting.
#[derive(Debug, Clone)]
pub(crate) struct SearchOutcome {
    pub tree: Tree,
    pub params: ModelParameters,
    pub log_likelihood: f64,
    pub status: SearchStatus,
    pub iterations: usize,
}

impl SearchOutcome {
    pub(crate) fn into_result(self, model: &Model, seed: u64, support: Vec<BranchSupport>) -> AnalysisResult {
        AnalysisResult {
            tree: to_newick(&self.tree),
            model: model.to_string(),
            log_likelihood: self.log_likelihood,
            params: ModelReport::from(&self.params),
            seed,
            status: self.status,
            iterations: self.iterations,
            tree_length: self.tree.total_length(),
            support,
        }
    }
}

/// The search proper, drawing all randomness from `rng`.
pub(crate) fn search_ml<R: Rng>(alignment: &Alignment, model: &Model, config: &SearchConfig, rng: &mut R) -> Result<SearchOutcome> {
    let n = alignment.len();
    if n < 3 {
        return Err(PhyloError::DegenerateInput(format!("tree search needs at least 3 taxa, got {n}")));
    }
    model.check_seq_type(alignment.seq_type())?;

    let data = LikelihoodData::new(alignment);
    let freqs = alignment.state_frequencies();
    let options = config.fit_options();

    let distances = distance::compute_with(alignment, &JukesCantor::new(alignment.seq_type()), 1)?;
    let mut starts = vec![nj_from_matrix(&distances)?];
    for _ in 0..config.random_starts {
        starts.push(random::random_tree_for_taxa(alignment.names(), TreeGenMode::Uniform, rng)?);
    }

    let mut best: Option<SearchOutcome> = None;
    for (i, mut tree) in starts.into_iter().enumerate() {
        tree.fill_missing_lengths(DEFAULT_BRANCH_LENGTH);
        let mut params = ModelParameters::initial(*model, &freqs);
        let mut lnl = data.optimize_all(&mut tree, &mut params, &options)?;
        lnl = hill_climb(&data, &mut tree, &params, lnl, config.tolerance)?;
        lnl = data.optimize_all(&mut tree, &mut params, &options)?;
        log::debug!("starting tree {i}: lnL {lnl:.4}");
        if best.as_ref().is_none_or(|b| lnl > b.log_likelihood) {
            best = Some(SearchOutcome {
                tree,
                params,
                log_likelihood: lnl,
                status: SearchStatus::Converged,
                iterations: 0,
            });
        }
    }
    let Some(mut best) = best else {
        return Err(PhyloError::DegenerateInput("no starting tree could be built".into()));
    };

    let mut unsuccessful = 0;
    loop {
        if unsuccessful >= config.unsuccessful_stop {
            best.status = SearchStatus::Converged;
            break;
        }
        if best.iterations >= config.max_iterations {
            best.status = SearchStatus::BudgetExhausted;
            log::warn!(
                "search stopped after {} rounds without converging; returning the best tree found",
                best.iterations
            );
            break;
        }
        best.iterations += 1;

        let mut tree = best.tree.clone();
        let mut params = best.params.clone();
        perturb(&mut tree, config.perturbation_strength, rng);
        let lnl = data.optimize_branch_lengths(&mut tree, &params, options.branch_passes)?;
        hill_climb(&data, &mut tree, &params, lnl, config.tolerance)?;
        let lnl = data.optimize_all(&mut tree, &mut params, &options)?;

        if lnl > best.log_likelihood + config.tolerance {
            log::debug!("round {}: lnL {:.4} -> {lnl:.4}", best.iterations, best.log_likelihood);
            best.tree = tree;
            best.params = params;
            best.log_likelihood = lnl;
            unsuccessful = 0;
        } else {
            unsuccessful += 1;
        }
    }
    Ok(best)
}

/// Apply improving NNIs until none is left. Each candidate gets one sweep of
/// branch-length optimisation before it is compared.
fn hill_climb(data: &LikelihoodData, tree: &mut Tree, params: &ModelParameters, mut lnl: f64, tolerance: f64) -> Result<f64> {
    'restart: loop {
        for v in tree.internal_edges() {
            for (a, b) in tree.nni_moves(v) {
                let mut candidate = tree.clone();
                candidate.swap_subtrees(a, b);
                let candidate_lnl = data.optimize_branch_lengths(&mut candidate, params, 1)?;
                if candidate_lnl > lnl + tolerance {
                    *tree = candidate;
                    lnl = candidate_lnl;
                    continue 'restart;
                }
            }
        }
        return Ok(lnl);
    }
}

/// Random NNIs on roughly `strength` of the internal branches.
fn perturb<R: Rng>(tree: &mut Tree, strength: f64, rng: &mut R) {
    let internal = tree.internal_edges();
    if internal.is_empty() {
        return;
    }
    let moves = ((strength * internal.len() as f64).round() as usize).max(1);
    for _ in 0..moves {
        let internal = tree.internal_edges();
        let v = internal[rng.random_range(0..internal.len())];
        let options = tree.nni_moves(v);
        if options.is_empty() {
            continue;
        }
        let (a, b) = options[rng.random_range(0..options.len())];
        tree.swap_subtrees(a, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::robinson_foulds;
    use crate::simulate::simulate_alignment;

    fn quick_config(seed: u64) -> SearchConfig {
        SearchConfig { seed, max_iterations: 5, unsuccessful_stop: 3, random_starts: 1, ..SearchConfig::default() }
    }

    fn simulated(newick: &str, width: usize, seed: u64) -> Alignment {
        let tree = parse_newick(newick).unwrap();
        let params = ModelParameters::initial("JC".parse::<Model>().unwrap(), &[0.25; 4]);
        simulate_alignment(&tree, &params, width, &mut Xoshiro256PlusPlus::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn recovers_a_clear_topology() {
        let truth = "((A:0.05,B:0.05):0.3,(C:0.05,D:0.05):0.3,(E:0.05,F:0.05):0.3);";
        let aln = simulated(truth, 400, 17);
        let model: Model = "JC".parse().unwrap();
        let result = build_tree(&aln, &model, &quick_config(4)).unwrap();
        let found = parse_newick(&result.tree).unwrap();
        assert_eq!(robinson_foulds(&found, &parse_newick(truth).unwrap()).unwrap(), 0);
        assert!(result.log_likelihood < 0.0);
        assert_eq!(result.model, "JC");
        assert_eq!(result.seed, 4);
    }

    #[test]
    fn same_seed_same_result() {
        let aln = simulated("((A:0.1,B:0.2):0.1,C:0.1,(D:0.2,E:0.1):0.1);", 120, 3);
        let model: Model = "K2P".parse().unwrap();
        let a = build_tree(&aln, &model, &quick_config(11)).unwrap();
        let b = build_tree(&aln, &model, &quick_config(11)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_budget_reports_exhaustion() {
        let aln = simulated("((A:0.1,B:0.2):0.1,C:0.1,D:0.2);", 60, 8);
        let config = SearchConfig { seed: 1, max_iterations: 0, random_starts: 0, ..SearchConfig::default() };
        let result = build_tree(&aln, &"JC".parse().unwrap(), &config).unwrap();
        assert_eq!(result.status, SearchStatus::BudgetExhausted);
        assert_eq!(result.iterations, 0);
        assert!(parse_newick(&result.tree).is_ok());
    }

    #[test]
    fn converges_when_rounds_stop_improving() {
        let aln = simulated("((A:0.1,B:0.2):0.1,C:0.1,D:0.2);", 60, 8);
        let config = SearchConfig { seed: 1, max_iterations: 1000, unsuccessful_stop: 2, ..SearchConfig::default() };
        let result = build_tree(&aln, &"JC".parse().unwrap(), &config).unwrap();
        assert_eq!(result.status, SearchStatus::Converged);
        assert!(result.iterations < 1000);
    }

    #[test]
    fn fit_three_taxa_matches_likelihood_of_fitted_tree() {
        let aln = Alignment::new(vec!["A", "B", "C"], vec!["ACGTACGTAA", "ACGTACGTTA", "ACGAACCTTA"]).unwrap();
        let model: Model = "JC".parse().unwrap();
        let result = fit_tree(&aln, &model, "(A,B,C);", &SearchConfig::default()).unwrap();
        let tree = parse_newick(&result.tree).unwrap();
        let params = ModelParameters::initial(model, &[0.25; 4]);
        let lnl = LikelihoodData::new(&aln).log_likelihood(&tree, &params).unwrap();
        // Newick output rounds lengths to six decimals.
        assert!((lnl - result.log_likelihood).abs() < 1e-3);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.status, SearchStatus::Converged);
    }

    #[test]
    fn fit_unroots_and_keeps_topology() {
        let aln = simulated("((A:0.1,B:0.2):0.1,C:0.1,(D:0.2,E:0.1):0.1);", 100, 5);
        let newick = "(((A,B),C),(D,E));";
        let result = fit_tree(&aln, &"HKY+G4".parse().unwrap(), newick, &SearchConfig::default()).unwrap();
        let fitted = parse_newick(&result.tree).unwrap();
        assert!(!fitted.is_rooted());
        assert_eq!(robinson_foulds(&fitted, &parse_newick(newick).unwrap()).unwrap(), 0);
        assert!(result.params.gamma_shape.is_some());
    }

    #[test]
    fn fit_reports_the_seed_it_used() {
        let aln = Alignment::new(vec!["A", "B", "C"], vec!["ACGTACGTAA", "ACGTACGTTA", "ACGAACCTTA"]).unwrap();
        let model: Model = "JC".parse().unwrap();
        let drawn = fit_tree(&aln, &model, "(A,B,C);", &SearchConfig::default()).unwrap();
        assert_ne!(drawn.seed, 0);
        let fixed = SearchConfig { seed: 9, ..SearchConfig::default() };
        assert_eq!(fit_tree(&aln, &model, "(A,B,C);", &fixed).unwrap().seed, 9);
    }

    #[test]
    fn input_errors() {
        let aln = Alignment::new(vec!["A", "B"], vec!["AC", "AG"]).unwrap();
        assert!(matches!(
            build_tree(&aln, &"JC".parse().unwrap(), &SearchConfig::default()),
            Err(PhyloError::DegenerateInput(_))
        ));

        let aln = Alignment::new(vec!["A", "B", "C"], vec!["AC", "AG", "AT"]).unwrap();
        let config = SearchConfig::default();
        assert!(matches!(fit_tree(&aln, &"JC".parse().unwrap(), "((A,B);", &config), Err(PhyloError::Parse(_))));
        assert!(matches!(
            fit_tree(&aln, &"JC".parse().unwrap(), "(A,B,D);", &config),
            Err(PhyloError::Validation(_))
        ));
        assert!(matches!(
            build_tree(&aln, &"Poisson".parse().unwrap(), &config),
            Err(PhyloError::Configuration(_))
        ));
        let bad = SearchConfig { perturbation_strength: 0.0, ..SearchConfig::default() };
        assert!(matches!(build_tree(&aln, &"JC".parse().unwrap(), &bad), Err(PhyloError::Configuration(_))));
    }
}
