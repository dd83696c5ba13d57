//! Model selection by information criteria.
//!
//! The candidate set is the Cartesian product of substitution models,
//! frequency types and rate-heterogeneity types. Every candidate is fitted
//! on the same neighbour-joining topology and scored by
//!
//! | criterion | formula                                   |
//! |-----------|-------------------------------------------|
//! | AIC       | `-2 lnL + 2k`                             |
//! | AICc      | `AIC + 2k(k+1) / (N - k - 1)`             |
//! | BIC       | `-2 lnL + k ln N`                         |
//!
//! with `k` free parameters (branch lengths included) and `N` sites.

use crate::alignment::{Alignment, SeqType};
use crate::distance::{self, JukesCantor};
use crate::error::{PhyloError, Result};
use crate::likelihood::{FitOptions, LikelihoodData};
use crate::model::{FreqType, Model, ModelParameters, RateType, SubstitutionModel};
use crate::nj::nj_from_matrix;
use crate::pool;
use crate::random;
use crate::report::{AnalysisResult, SearchStatus};
use crate::search::{DEFAULT_BRANCH_LENGTH, SearchOutcome};
use crate::tree::Tree;
use itertools::{Itertools, iproduct};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rate types tried when the rate set is left empty.
pub const DEFAULT_RATE_SET: [&str; 6] = ["", "+I", "+G4", "+I+G4", "+R2", "+R3"];

/// Candidate sets are comma-separated lists; an empty string selects the
/// default for that axis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelFinderConfig {
    /// Substitution models, e.g. `"JC,HKY,GTR"`.
    pub model_set: String,
    /// Frequency types out of `F`, `FO`, `FQ`. Empty keeps each model's own.
    pub freq_set: String,
    /// Rate types such as `"E,I,G4,I+G4,R3"`; `E` is rate homogeneity.
    pub rate_set: String,
    pub seed: u64,
    /// `0` uses every core.
    pub threads: usize,
}

/// Score of one fitted candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelScore {
    pub model: String,
    pub log_likelihood: f64,
    pub num_free_params: usize,
    pub tree_length: f64,
    pub aic: f64,
    pub aicc: f64,
    pub bic: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFinderResult {
    pub best_aic: String,
    pub best_aicc: String,
    pub best_bic: String,
    /// All candidates, best BIC first.
    pub scores: Vec<ModelScore>,
    /// Fit of the BIC-best candidate.
    pub best_result: AnalysisResult,
}

impl ModelFinderResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Akaike information criterion.
pub fn aic(log_likelihood: f64, num_params: usize) -> f64 {
    -2.0 * log_likelihood + 2.0 * num_params as f64
}

/// Small-sample corrected AIC; infinite when `num_sites <= num_params + 1`.
pub fn aicc(log_likelihood: f64, num_params: usize, num_sites: usize) -> f64 {
    let k = num_params as f64;
    let n = num_sites as f64;
    if n > k + 1.0 {
        aic(log_likelihood, num_params) + 2.0 * k * (k + 1.0) / (n - k - 1.0)
    } else {
        f64::INFINITY
    }
}

/// Bayesian information criterion.
pub fn bic(log_likelihood: f64, num_params: usize, num_sites: usize) -> f64 {
    -2.0 * log_likelihood + num_params as f64 * (num_sites as f64).ln()
}

/// A model selection strategy.
pub trait ModelSelector {
    fn select(&self, alignment: &Alignment) -> Result<ModelFinderResult>;
}

/// Exhaustive fitting of every candidate on a shared NJ topology.
#[derive(Debug, Clone, Default)]
pub struct ModelFinder {
    pub config: ModelFinderConfig,
    pub fit: FitOptions,
}

impl ModelFinder {
    pub fn new(config: ModelFinderConfig) -> Self {
        ModelFinder { config, fit: FitOptions::default() }
    }
}

struct Fitted {
    model: Model,
    tree: Tree,
    params: ModelParameters,
    log_likelihood: f64,
}

impl ModelSelector for ModelFinder {
    fn select(&self, alignment: &Alignment) -> Result<ModelFinderResult> {
        let n = alignment.len();
        if n < 3 {
            return Err(PhyloError::DegenerateInput(format!("model selection needs at least 3 taxa, got {n}")));
        }
        let candidates = expand_candidates(&self.config, alignment.seq_type())?;
        let seed = if self.config.seed == 0 { random::fresh_seed() } else { self.config.seed };

        let distances = distance::compute_with(alignment, &JukesCantor::new(alignment.seq_type()), self.config.threads)?;
        let mut start = nj_from_matrix(&distances)?;
        start.fill_missing_lengths(DEFAULT_BRANCH_LENGTH);

        let data = LikelihoodData::new(alignment);
        let freqs = alignment.state_frequencies();
        log::info!("fitting {} candidate models on {} threads", candidates.len(), pool::resolve_threads(self.config.threads));

        let fitted: Vec<Fitted> = pool::install(self.config.threads, || {
            candidates
                .par_iter()
                .map(|&model| {
                    let mut tree = start.clone();
                    let mut params = ModelParameters::initial(model, &freqs);
                    let log_likelihood = data.optimize_all(&mut tree, &mut params, &self.fit)?;
                    log::debug!("{model}: lnL {log_likelihood:.4}");
                    Ok(Fitted { model, tree, params, log_likelihood })
                })
                .collect::<Result<Vec<_>>>()
        })??;

        let num_sites = alignment.width();
        let mut ranked: Vec<(ModelScore, Fitted)> = fitted
            .into_iter()
            .map(|f| {
                let k = f.model.num_free_params(n);
                let score = ModelScore {
                    model: f.model.to_string(),
                    log_likelihood: f.log_likelihood,
                    num_free_params: k,
                    tree_length: f.tree.total_length(),
                    aic: aic(f.log_likelihood, k),
                    aicc: aicc(f.log_likelihood, k, num_sites),
                    bic: bic(f.log_likelihood, k, num_sites),
                };
                (score, f)
            })
            .collect();
        ranked.sort_by(|(a, _), (b, _)| by_criterion(a, b, |s| s.bic));

        let best_by = |key: fn(&ModelScore) -> f64| {
            ranked
                .iter()
                .map(|(s, _)| s)
                .min_by(|a, b| by_criterion(a, b, key))
                .map(|s| s.model.clone())
                .unwrap_or_default()
        };
        let best_aic = best_by(|s| s.aic);
        let best_aicc = best_by(|s| s.aicc);

        let mut ranked = ranked.into_iter();
        let Some((best_score, best)) = ranked.next() else {
            return Err(PhyloError::Configuration("no candidate models to evaluate".into()));
        };
        log::info!("best model by BIC: {} (BIC {:.3})", best_score.model, best_score.bic);

        let outcome = SearchOutcome {
            tree: best.tree,
            params: best.params,
            log_likelihood: best.log_likelihood,
            status: SearchStatus::Converged,
            iterations: 0,
        };
        let best_result = outcome.into_result(&best.model, seed, Vec::new());
        let mut scores = vec![best_score];
        scores.extend(ranked.map(|(s, _)| s));

        Ok(ModelFinderResult { best_aic, best_aicc, best_bic: scores[0].model.clone(), scores, best_result })
    }
}

/// Fit every candidate model and rank them.
///
/// # Errors
/// - [`PhyloError::DegenerateInput`] for fewer than 3 taxa
/// - [`PhyloError::Configuration`] for an unknown entry in any candidate set,
///   or a model that does not fit the alignment's alphabet
pub fn select_model(alignment: &Alignment, config: &ModelFinderConfig) -> Result<ModelFinderResult> {
    ModelFinder::new(config.clone()).select(alignment)
}

fn by_criterion(a: &ModelScore, b: &ModelScore, key: impl Fn(&ModelScore) -> f64) -> Ordering {
    key(a).total_cmp(&key(b)).then_with(|| a.model.cmp(&b.model))
}

fn entries(list: &str) -> Vec<&str> {
    list.split(',').map(str::trim).filter(|e| !e.is_empty()).collect()
}

/// Cartesian product of the three candidate axes, duplicates removed.
pub fn expand_candidates(config: &ModelFinderConfig, seq_type: SeqType) -> Result<Vec<Model>> {
    let models: Vec<SubstitutionModel> = if config.model_set.trim().is_empty() {
        match seq_type {
            SeqType::Dna => SubstitutionModel::DNA.to_vec(),
            SeqType::Protein => SubstitutionModel::PROTEIN.to_vec(),
        }
    } else {
        entries(&config.model_set)
            .into_iter()
            .map(|name| {
                let model: Model = name.parse()?;
                if model != Model::new(model.substitution) {
                    return Err(PhyloError::Configuration(format!(
                        "model set entry '{name}' must be a bare substitution model name"
                    )));
                }
                model.check_seq_type(seq_type)?;
                Ok(model.substitution)
            })
            .collect::<Result<_>>()?
    };

    let freqs: Vec<Option<FreqType>> = if config.freq_set.trim().is_empty() {
        vec![None]
    } else {
        entries(&config.freq_set)
            .into_iter()
            .map(|f| {
                FreqType::from_suffix(f)
                    .map(Some)
                    .ok_or_else(|| PhyloError::Configuration(format!("unknown frequency type '{f}'")))
            })
            .collect::<Result<_>>()?
    };

    let rates: Vec<RateType> = if config.rate_set.trim().is_empty() {
        DEFAULT_RATE_SET.iter().map(|r| RateType::parse(r)).collect::<Result<_>>()?
    } else {
        entries(&config.rate_set)
            .into_iter()
            .map(|r| if r.eq_ignore_ascii_case("E") { Ok(RateType::default()) } else { RateType::parse(r) })
            .collect::<Result<_>>()?
    };

    let candidates: Vec<Model> = iproduct!(models, freqs, rates)
        .map(|(substitution, freq_type, rate_type)| Model::with_parts(substitution, freq_type, rate_type))
        .collect::<Result<_>>()?;
    Ok(candidates.into_iter().unique().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newick::parse_newick;
    use crate::simulate::simulate_alignment;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    const TRUE_TREE: &str = "((A:0.1,B:0.15):0.1,(C:0.12,D:0.08):0.15,(E:0.2,F:0.1):0.1);";

    fn simulate(params: &ModelParameters, width: usize, seed: u64) -> Alignment {
        let tree = parse_newick(TRUE_TREE).unwrap();
        simulate_alignment(&tree, params, width, &mut Xoshiro256PlusPlus::seed_from_u64(seed)).unwrap()
    }

    fn config(models: &str, rates: &str) -> ModelFinderConfig {
        ModelFinderConfig { model_set: models.into(), rate_set: rates.into(), seed: 1, threads: 2, ..Default::default() }
    }

    #[test]
    fn criteria_values() {
        assert!((aic(-100.0, 5) - 210.0).abs() <= 1e-12);
        assert!((bic(-100.0, 5, 100) - (200.0 + 5.0 * 100f64.ln())).abs() <= 1e-12);
        assert!((aicc(-100.0, 5, 100) - (210.0 + 60.0 / 94.0)).abs() <= 1e-12);
        assert!(aicc(-100.0, 5, 6).is_infinite());
        assert!((aicc(-100.0, 3, 100_000) - aic(-100.0, 3)).abs() < 1e-3);
    }

    #[test]
    fn default_candidates() {
        let dna = expand_candidates(&ModelFinderConfig::default(), SeqType::Dna).unwrap();
        assert_eq!(dna.len(), 22 * DEFAULT_RATE_SET.len());
        assert!(dna.iter().all(|m| m.freq_type.is_none()));
        assert!(dna.iter().any(|m| m.to_string() == "GTR+I+G4"));

        let protein = expand_candidates(&ModelFinderConfig::default(), SeqType::Protein).unwrap();
        assert_eq!(protein.len(), 5 * DEFAULT_RATE_SET.len());
        let matrices: Vec<SubstitutionModel> = protein.iter().map(|m| m.substitution).unique().collect();
        assert_eq!(matrices, SubstitutionModel::PROTEIN);
    }

    #[test]
    fn explicit_candidates() {
        let cfg = ModelFinderConfig {
            model_set: "JC, hky".into(),
            freq_set: "FQ,+F".into(),
            rate_set: "E,G,I+R3,G".into(),
            ..Default::default()
        };
        let names: Vec<String> = expand_candidates(&cfg, SeqType::Dna).unwrap().iter().map(Model::to_string).collect();
        assert_eq!(names.len(), 12);
        assert_eq!(&names[..3], ["JC+FQ", "JC+FQ+G4", "JC+FQ+I+R3"]);
        assert!(names.contains(&"HKY+F+G4".to_string()));
    }

    #[test]
    fn unknown_entries_are_rejected() {
        let bad = [
            ModelFinderConfig { model_set: "JC,FOO".into(), ..Default::default() },
            ModelFinderConfig { model_set: "HKY+G4".into(), ..Default::default() },
            ModelFinderConfig { freq_set: "F,X".into(), ..Default::default() },
            ModelFinderConfig { rate_set: "+Q".into(), ..Default::default() },
            ModelFinderConfig { model_set: "Poisson".into(), ..Default::default() },
            ModelFinderConfig { model_set: "JC".into(), freq_set: "FU".into(), ..Default::default() },
        ];
        for cfg in &bad {
            assert!(
                matches!(expand_candidates(cfg, SeqType::Dna), Err(PhyloError::Configuration(_))),
                "{cfg:?} accepted"
            );
        }
    }

    #[test]
    fn recovers_equal_rates_model() {
        let params = ModelParameters::initial("JC".parse::<Model>().unwrap(), &[0.25; 4]);
        let aln = simulate(&params, 500, 7);
        let result = select_model(&aln, &config("JC,GTR", "E,G4")).unwrap();
        assert_eq!(result.best_bic, "JC");
        assert_eq!(result.scores.len(), 4);
        assert_eq!(result.scores[0].model, "JC");
        assert!(result.scores.windows(2).all(|w| w[0].bic <= w[1].bic));
        assert_eq!(result.best_result.model, "JC");
        assert!((result.best_result.log_likelihood - result.scores[0].log_likelihood).abs() <= 1e-9);
    }

    #[test]
    fn recovers_transition_bias() {
        for seed in [3, 4, 5] {
            let mut params = ModelParameters::initial("K2P".parse::<Model>().unwrap(), &[0.25; 4]);
            params.class_values[1] = 6.0;
            let aln = simulate(&params, 1000, seed);
            let result = select_model(&aln, &config("JC,K80", "E")).unwrap();
            assert_eq!(result.best_bic, "K80", "seed {seed}");
            assert_eq!(result.best_aic, "K80", "seed {seed}");
            let k2p = &result.scores[0];
            assert_eq!(k2p.num_free_params, 9 + 1);
        }
    }

    #[test]
    fn prefers_empirical_protein_matrix() {
        let params = ModelParameters::initial("LG".parse::<Model>().unwrap(), &[0.05; 20]);
        let aln = simulate(&params, 400, 11);
        assert_eq!(aln.seq_type(), SeqType::Protein);
        let result = select_model(&aln, &config("Poisson,LG", "E")).unwrap();
        assert_eq!(result.best_bic, "LG");
        assert_eq!(result.scores[0].num_free_params, 9);
    }

    #[test]
    fn too_few_taxa() {
        let aln = Alignment::new(vec!["A", "B"], vec!["ACGT", "ACGA"]).unwrap();
        assert!(matches!(select_model(&aln, &config("JC", "E")), Err(PhyloError::DegenerateInput(_))));
    }

    #[test]
    fn result_serializes() {
        let params = ModelParameters::initial("JC".parse::<Model>().unwrap(), &[0.25; 4]);
        let aln = simulate(&params, 60, 2);
        let result = select_model(&aln, &config("JC", "E,I")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(value["scores"].as_array().unwrap().len(), 2);
        assert!(value["scores"][0].get("numFreeParams").is_some());
        assert!(value["bestResult"].get("logLikelihood").is_some());
    }
}
