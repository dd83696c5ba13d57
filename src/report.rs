//! Serializable analysis results.
//!
//! ```json
//! {
//!   "tree": "(A:0.1,B:0.2,(C:0.3,D:0.4)95:0.05);",
//!   "model": "HKY+G4",
//!   "logLikelihood": -1234.5,
//!   "params": { "rates": {"A-C": 1.0, ...}, "stateFreq": [...], "gammaShape": 0.8 },
//!   "seed": 42,
//!   "status": "CONVERGED",
//!   ...
//! }
//! ```

use crate::error::Result;
use crate::model::{ModelParameters, RateModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a tree search ended. Both outcomes carry the best tree found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    /// The stopping rule fired before the iteration budget ran out.
    Converged,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeRateCategory {
    pub weight: f64,
    pub rate: f64,
}

/// Fitted model parameters, keyed the way phylogenetics tools usually print them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelReport {
    /// Exchangeabilities by state pair (`"A-C"` ... `"G-T"`); empty for protein.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rates: BTreeMap<String, f64>,
    pub state_freq: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma_shape: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_invar: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub free_rates: Vec<FreeRateCategory>,
}

impl From<&ModelParameters> for ModelReport {
    fn from(params: &ModelParameters) -> Self {
        let rate_type = params.model.rate_type;
        let gamma_shape = matches!(rate_type.model, Some(RateModel::Gamma(_))).then_some(params.gamma_shape);
        let free_rates = params
            .free_weights
            .iter()
            .zip(&params.free_rates)
            .map(|(&weight, &rate)| FreeRateCategory { weight, rate })
            .collect();
        ModelReport {
            rates: params.named_exchangeabilities().into_iter().collect(),
            state_freq: params.freqs.clone(),
            gamma_shape,
            p_invar: rate_type.invariant.then_some(params.p_invar),
            free_rates,
        }
    }
}

/// Bootstrap support of one internal branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSupport {
    /// Taxa on the side of the branch without the alphabetically first taxon.
    pub split: Vec<String>,
    /// Percentage of replicates containing the split, in `[0, 100]`.
    pub support: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Newick, with support labels on internal nodes when bootstrapped.
    pub tree: String,
    pub model: String,
    pub log_likelihood: f64,
    pub params: ModelReport,
    pub seed: u64,
    pub status: SearchStatus,
    /// Perturbation rounds run (0 for fixed-topology fits).
    pub iterations: usize,
    pub tree_length: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub support: Vec<BranchSupport>,
}

impl AnalysisResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn sample() -> AnalysisResult {
        let params = ModelParameters::initial("HKY+I+G4".parse::<Model>().unwrap(), &[0.1, 0.2, 0.3, 0.4]);
        AnalysisResult {
            tree: "(A:0.1,B:0.2,C:0.3);".into(),
            model: params.model.to_string(),
            log_likelihood: -12.5,
            params: ModelReport::from(&params),
            seed: 7,
            status: SearchStatus::BudgetExhausted,
            iterations: 3,
            tree_length: 0.6,
            support: Vec::new(),
        }
    }

    #[test]
    fn json_uses_expected_keys() {
        let value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(value["model"], "HKY+I+G4");
        assert_eq!(value["status"], "BUDGET_EXHAUSTED");
        assert_eq!(value["logLikelihood"], -12.5);
        assert_eq!(value["params"]["rates"]["A-G"], 1.0);
        assert_eq!(value["params"]["gammaShape"], 1.0);
        assert_eq!(value["params"]["pInvar"], 0.1);
        assert!(value["params"].get("freeRates").is_none());
        assert!(value.get("support").is_none());
    }

    #[test]
    fn json_round_trip() {
        let mut result = sample();
        result.support = vec![BranchSupport { split: vec!["C".into(), "D".into()], support: 87.0 }];
        let back = AnalysisResult::from_json(&result.to_json().unwrap()).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn free_rate_categories_are_reported() {
        let params = ModelParameters::initial("JC+R3".parse::<Model>().unwrap(), &[0.25; 4]);
        let report = ModelReport::from(&params);
        assert_eq!(report.free_rates.len(), 3);
        assert!(report.gamma_shape.is_none());
        assert!(report.p_invar.is_none());
    }
}
