//! Substitution model specifications.
//!
//! A [`Model`] combines a substitution model name, a state-frequency type
//! and a rate-heterogeneity type, written in the usual `NAME+F+I+G4` form:
//!
//! ```
//! # use phylo_engine::model::Model;
//! let m: Model = "GTR+F+I+G4".parse().unwrap();
//! assert_eq!(m.to_string(), "GTR+F+I+G4");
//! let m: Model = "hky+g".parse().unwrap();
//! assert_eq!(m.to_string(), "HKY+G4");
//! ```
//!
//! [`ModelParameters`] carries the numeric values of a model during fitting
//! and exposes them as a flat list of [`Coordinate`]s for the optimiser.

use crate::alignment::SeqType;
use crate::error::{PhyloError, Result};
use crate::protein::{self, EmpiricalMatrix};
use crate::rates::{SiteRates, discrete_gamma};
use std::fmt;
use std::str::FromStr;

/// Default number of categories for `+G` and `+R` without a count.
pub const DEFAULT_RATE_CATEGORIES: usize = 4;
/// Largest category count accepted for `+G` and `+R`.
pub const MAX_RATE_CATEGORIES: usize = 20;

/// Bounds shared by the optimiser and initial values.
pub const MIN_EXCHANGE: f64 = 1e-4;
pub const MAX_EXCHANGE: f64 = 100.0;
pub const MIN_GAMMA_SHAPE: f64 = 0.02;
pub const MAX_GAMMA_SHAPE: f64 = 100.0;
pub const MAX_P_INVAR: f64 = 0.99;
pub const MIN_FREE_RATE: f64 = 1e-4;
pub const MAX_FREE_RATE: f64 = 100.0;

/// Reversible substitution models. DNA exchangeabilities are grouped into
/// classes over the pairs `(AC, AG, AT, CG, CT, GT)`; the class containing
/// `GT` is fixed at 1. Protein models other than `Poisson` use a fixed
/// empirical matrix and have no free exchangeabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubstitutionModel {
    JC,
    F81,
    K80,
    HKY,
    TNe,
    TN,
    K81,
    K81u,
    TPM2,
    TPM2u,
    TPM3,
    TPM3u,
    TIMe,
    TIM,
    TIM2e,
    TIM2,
    TIM3e,
    TIM3,
    TVMe,
    TVM,
    SYM,
    GTR,
    Poisson,
    LG,
    WAG,
    JTT,
    Dayhoff,
}

impl SubstitutionModel {
    /// All DNA models, from the simplest to GTR.
    pub const DNA: [SubstitutionModel; 22] = [
        Self::JC,
        Self::F81,
        Self::K80,
        Self::HKY,
        Self::TNe,
        Self::TN,
        Self::K81,
        Self::K81u,
        Self::TPM2,
        Self::TPM2u,
        Self::TPM3,
        Self::TPM3u,
        Self::TIMe,
        Self::TIM,
        Self::TIM2e,
        Self::TIM2,
        Self::TIM3e,
        Self::TIM3,
        Self::TVMe,
        Self::TVM,
        Self::SYM,
        Self::GTR,
    ];

    /// Protein models, Poisson first.
    pub const PROTEIN: [SubstitutionModel; 5] = [Self::Poisson, Self::LG, Self::WAG, Self::JTT, Self::Dayhoff];

    pub fn name(self) -> &'static str {
        match self {
            Self::JC => "JC",
            Self::F81 => "F81",
            Self::K80 => "K80",
            Self::HKY => "HKY",
            Self::TNe => "TNe",
            Self::TN => "TN",
            Self::K81 => "K81",
            Self::K81u => "K81u",
            Self::TPM2 => "TPM2",
            Self::TPM2u => "TPM2u",
            Self::TPM3 => "TPM3",
            Self::TPM3u => "TPM3u",
            Self::TIMe => "TIMe",
            Self::TIM => "TIM",
            Self::TIM2e => "TIM2e",
            Self::TIM2 => "TIM2",
            Self::TIM3e => "TIM3e",
            Self::TIM3 => "TIM3",
            Self::TVMe => "TVMe",
            Self::TVM => "TVM",
            Self::SYM => "SYM",
            Self::GTR => "GTR",
            Self::Poisson => "Poisson",
            Self::LG => "LG",
            Self::WAG => "WAG",
            Self::JTT => "JTT",
            Self::Dayhoff => "Dayhoff",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::JC => "Equal substitution rates and equal base frequencies (Jukes and Cantor, 1969).",
            Self::F81 => "Equal rates but unequal base frequencies (Felsenstein, 1981).",
            Self::K80 => "Unequal transition/transversion rates and equal base frequencies (Kimura, 1980).",
            Self::HKY => {
                "Unequal transition/transversion rates and unequal base frequencies (Hasegawa, Kishino and Yano, 1985)."
            }
            Self::TNe => "Like TN but equal base frequencies.",
            Self::TN => "Like HKY but unequal purine/pyrimidine rates (Tamura and Nei, 1993).",
            Self::K81 => "Three substitution types and equal base frequencies (Kimura, 1981).",
            Self::K81u => "Like K81 but unequal base frequencies.",
            Self::TPM2 => "AC=AT, AG=CT, CG=GT and equal base frequencies.",
            Self::TPM2u => "Like TPM2 but unequal base frequencies.",
            Self::TPM3 => "AC=CG, AG=CT, AT=GT and equal base frequencies.",
            Self::TPM3u => "Like TPM3 but unequal base frequencies.",
            Self::TIMe => "Like TIM but equal base frequencies.",
            Self::TIM => "Transition model, AC=GT, AT=CG and unequal base frequencies.",
            Self::TIM2e => "Like TIM2 but equal base frequencies.",
            Self::TIM2 => "AC=AT, CG=GT and unequal base frequencies.",
            Self::TIM3e => "Like TIM3 but equal base frequencies.",
            Self::TIM3 => "AC=CG, AT=GT and unequal base frequencies.",
            Self::TVMe => "Like TVM but equal base frequencies.",
            Self::TVM => "Transversion model, AG=CT and unequal base frequencies.",
            Self::SYM => "Symmetric model with unequal rates but equal base frequencies (Zharkikh, 1994).",
            Self::GTR => "General time reversible model with unequal rates and unequal base frequencies (Tavare, 1986).",
            Self::Poisson => "Equal amino-acid exchange rates and equal frequencies.",
            Self::LG => "General matrix (Le and Gascuel, 2008).",
            Self::WAG => "General matrix (Whelan and Goldman, 2001).",
            Self::JTT => "General matrix (Jones et al., 1992).",
            Self::Dayhoff => "General matrix (Dayhoff et al., 1978).",
        }
    }

    /// Every model, DNA first.
    pub fn all() -> impl Iterator<Item = SubstitutionModel> {
        Self::DNA.into_iter().chain(Self::PROTEIN)
    }

    /// Fixed exchangeabilities and frequencies of an empirical protein model.
    pub fn empirical_matrix(self) -> Option<EmpiricalMatrix> {
        match self {
            Self::LG => Some(protein::LG),
            Self::WAG => Some(protein::WAG),
            Self::JTT => Some(protein::JTT),
            Self::Dayhoff => Some(protein::DAYHOFF),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let m = match name.to_ascii_uppercase().as_str() {
            "JC" | "JC69" => Self::JC,
            "F81" => Self::F81,
            "K80" | "K2P" => Self::K80,
            "HKY" | "HKY85" => Self::HKY,
            "TNE" | "TRNE" => Self::TNe,
            "TN" | "TRN" | "TN93" => Self::TN,
            "K81" | "K3P" => Self::K81,
            "K81U" | "K3PU" => Self::K81u,
            "TPM2" => Self::TPM2,
            "TPM2U" => Self::TPM2u,
            "TPM3" => Self::TPM3,
            "TPM3U" => Self::TPM3u,
            "TIME" => Self::TIMe,
            "TIM" => Self::TIM,
            "TIM2E" => Self::TIM2e,
            "TIM2" => Self::TIM2,
            "TIM3E" => Self::TIM3e,
            "TIM3" => Self::TIM3,
            "TVME" => Self::TVMe,
            "TVM" => Self::TVM,
            "SYM" => Self::SYM,
            "GTR" => Self::GTR,
            "POISSON" => Self::Poisson,
            "LG" => Self::LG,
            "WAG" => Self::WAG,
            "JTT" => Self::JTT,
            "DAYHOFF" => Self::Dayhoff,
            _ => return None,
        };
        Some(m)
    }

    pub fn seq_type(self) -> SeqType {
        match self {
            Self::Poisson | Self::LG | Self::WAG | Self::JTT | Self::Dayhoff => SeqType::Protein,
            _ => SeqType::Dna,
        }
    }

    /// Exchangeability class of each DNA pair `(AC, AG, AT, CG, CT, GT)`.
    pub fn exchange_pattern(self) -> [usize; 6] {
        match self {
            Self::JC | Self::F81 | Self::Poisson | Self::LG | Self::WAG | Self::JTT | Self::Dayhoff => {
                [0, 0, 0, 0, 0, 0]
            }
            Self::K80 | Self::HKY => [0, 1, 0, 0, 1, 0],
            Self::TNe | Self::TN => [0, 1, 0, 0, 2, 0],
            Self::K81 | Self::K81u => [0, 1, 2, 2, 1, 0],
            Self::TPM2 | Self::TPM2u => [0, 1, 0, 2, 1, 2],
            Self::TPM3 | Self::TPM3u => [0, 1, 2, 0, 1, 2],
            Self::TIMe | Self::TIM => [0, 1, 2, 2, 3, 0],
            Self::TIM2e | Self::TIM2 => [0, 1, 0, 2, 3, 2],
            Self::TIM3e | Self::TIM3 => [0, 1, 2, 0, 3, 2],
            Self::TVMe | Self::TVM => [0, 1, 2, 3, 1, 4],
            Self::SYM | Self::GTR => [0, 1, 2, 3, 4, 5],
        }
    }

    /// Number of exchangeability classes.
    pub fn num_classes(self) -> usize {
        self.exchange_pattern().iter().max().map_or(1, |m| m + 1)
    }

    /// Class fixed at 1 (the one holding `GT`).
    pub fn fixed_class(self) -> usize {
        self.exchange_pattern()[5]
    }

    /// Free exchangeability parameters.
    pub fn num_rate_params(self) -> usize {
        self.num_classes() - 1
    }

    /// Frequency type implied by the model name.
    pub fn natural_freq(self) -> FreqType {
        match self {
            Self::JC
            | Self::K80
            | Self::TNe
            | Self::K81
            | Self::TPM2
            | Self::TPM3
            | Self::TIMe
            | Self::TIM2e
            | Self::TIM3e
            | Self::TVMe
            | Self::SYM
            | Self::Poisson => FreqType::Equal,
            Self::LG | Self::WAG | Self::JTT | Self::Dayhoff => FreqType::Model,
            _ => FreqType::Empirical,
        }
    }
}

/// State-frequency type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreqType {
    /// `+F`: counted from the alignment.
    Empirical,
    /// `+FO`: estimated by maximum likelihood.
    Optimized,
    /// `+FQ`: all states equally frequent.
    Equal,
    /// `+FU`: the frequencies built into an empirical protein matrix.
    Model,
}

impl FreqType {
    pub const ALL: [FreqType; 4] = [FreqType::Empirical, FreqType::Optimized, FreqType::Equal, FreqType::Model];

    pub fn suffix(self) -> &'static str {
        match self {
            FreqType::Empirical => "+F",
            FreqType::Optimized => "+FO",
            FreqType::Equal => "+FQ",
            FreqType::Model => "+FU",
        }
    }

    /// Parse `F`, `FO`, `FQ` or `FU`, with or without the leading `+`.
    pub fn from_suffix(text: &str) -> Option<Self> {
        match text.trim().trim_start_matches('+').to_ascii_uppercase().as_str() {
            "F" => Some(FreqType::Empirical),
            "FO" => Some(FreqType::Optimized),
            "FQ" => Some(FreqType::Equal),
            "FU" => Some(FreqType::Model),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FreqType::Empirical => "Empirical state frequency observed from the data.",
            FreqType::Optimized => "State frequency optimized by maximum likelihood from the data.",
            FreqType::Equal => "Equal state frequency.",
            FreqType::Model => "State frequency given by an empirical protein matrix.",
        }
    }
}

/// Among-site rate variation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateModel {
    /// `+Gk`: discrete gamma with `k` categories.
    Gamma(usize),
    /// `+Rk`: free rates with `k` categories.
    FreeRate(usize),
}

impl RateModel {
    pub fn description(self) -> &'static str {
        match self {
            RateModel::Gamma(_) => "Discrete Gamma model (Yang, 1994), 4 categories unless given, e.g. +G8.",
            RateModel::FreeRate(_) => {
                "FreeRate model (Yang, 1995; Soubrier et al., 2012) relaxing the Gamma assumption, e.g. +R6."
            }
        }
    }
}

/// Rate-heterogeneity part of a model: invariant sites and/or a rate family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RateType {
    pub invariant: bool,
    pub model: Option<RateModel>,
}

impl RateType {
    /// Parse a rate suffix such as `""`, `"+I"`, `"+G4"` or `"+I+R3"`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rt = RateType::default();
        for token in text.split('+').map(str::trim).filter(|t| !t.is_empty()) {
            rt.apply_token(token, text)?;
        }
        Ok(rt)
    }

    fn apply_token(&mut self, token: &str, whole: &str) -> Result<()> {
        let upper = token.to_ascii_uppercase();
        if upper == "I" {
            if self.invariant {
                return Err(PhyloError::Configuration(format!("'+I' given twice in '{whole}'")));
            }
            self.invariant = true;
            return Ok(());
        }
        let mut chars = upper.chars();
        let family = chars.next();
        let digits = chars.as_str();
        if !matches!(family, Some('G' | 'R')) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(PhyloError::Configuration(format!("unknown model component '+{token}' in '{whole}'")));
        }
        if self.model.is_some() {
            return Err(PhyloError::Configuration(format!(
                "at most one of +G / +R may be given in '{whole}'"
            )));
        }
        let k = if digits.is_empty() {
            DEFAULT_RATE_CATEGORIES
        } else {
            digits
                .parse::<usize>()
                .map_err(|_| PhyloError::Configuration(format!("bad category count in '+{token}'")))?
        };
        let model = match family {
            Some('G') if (1..=MAX_RATE_CATEGORIES).contains(&k) => RateModel::Gamma(k),
            Some('R') if (2..=MAX_RATE_CATEGORIES).contains(&k) => RateModel::FreeRate(k),
            _ => {
                return Err(PhyloError::Configuration(format!(
                    "invalid number of rate categories in '+{token}'"
                )));
            }
        };
        self.model = Some(model);
        Ok(())
    }

    /// The six base rate-heterogeneity types with default category counts.
    pub fn base_types() -> [RateType; 6] {
        let gamma = Some(RateModel::Gamma(DEFAULT_RATE_CATEGORIES));
        let free = Some(RateModel::FreeRate(DEFAULT_RATE_CATEGORIES));
        [
            RateType { invariant: false, model: None },
            RateType { invariant: true, model: None },
            RateType { invariant: false, model: gamma },
            RateType { invariant: true, model: gamma },
            RateType { invariant: false, model: free },
            RateType { invariant: true, model: free },
        ]
    }

    pub fn description(&self) -> String {
        match (self.invariant, self.model) {
            (false, None) => "No invariable sites, no rate heterogeneity model.".to_string(),
            (true, None) => "A proportion of invariable sites.".to_string(),
            (false, Some(m)) => m.description().to_string(),
            (true, Some(m)) => format!("Invariable sites plus {}", m.description()),
        }
    }

    /// Free parameters contributed by rate heterogeneity.
    pub fn num_params(&self) -> usize {
        let inv = usize::from(self.invariant);
        inv + match self.model {
            None => 0,
            Some(RateModel::Gamma(_)) => 1,
            Some(RateModel::FreeRate(k)) => 2 * k.saturating_sub(1),
        }
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.invariant {
            write!(f, "+I")?;
        }
        match self.model {
            Some(RateModel::Gamma(k)) => write!(f, "+G{k}"),
            Some(RateModel::FreeRate(k)) => write!(f, "+R{k}"),
            None => Ok(()),
        }
    }
}

/// A complete model specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Model {
    pub substitution: SubstitutionModel,
    /// Explicit frequency type; `None` uses the model's natural one.
    pub freq_type: Option<FreqType>,
    pub rate_type: RateType,
}

impl Model {
    pub fn new(substitution: SubstitutionModel) -> Self {
        Model { substitution, freq_type: None, rate_type: RateType::default() }
    }

    /// Frequency type actually used.
    pub fn freq(&self) -> FreqType {
        self.freq_type.unwrap_or(self.substitution.natural_freq())
    }

    pub fn seq_type(&self) -> SeqType {
        self.substitution.seq_type()
    }

    /// Free parameters of the substitution process excluding branch lengths.
    pub fn num_model_params(&self) -> usize {
        let k = self.seq_type().num_states();
        let freq = match self.freq() {
            FreqType::Equal | FreqType::Model => 0,
            FreqType::Empirical | FreqType::Optimized => k - 1,
        };
        self.substitution.num_rate_params() + freq + self.rate_type.num_params()
    }

    /// Total free parameters for a tree with `num_taxa` leaves.
    pub fn num_free_params(&self, num_taxa: usize) -> usize {
        let branches = if num_taxa >= 3 { 2 * num_taxa - 3 } else { 1 };
        branches + self.num_model_params()
    }

    /// Build a model from its three parts.
    ///
    /// # Errors
    /// [`PhyloError::Configuration`] for `+FU` on a model without built-in
    /// frequencies.
    pub fn with_parts(substitution: SubstitutionModel, freq_type: Option<FreqType>, rate_type: RateType) -> Result<Self> {
        Model { substitution, freq_type, rate_type }.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.freq_type == Some(FreqType::Model) && self.substitution.empirical_matrix().is_none() {
            return Err(PhyloError::Configuration(format!(
                "'+FU' needs an empirical protein matrix, not {}",
                self.substitution.name()
            )));
        }
        Ok(self)
    }

    /// Check the model fits the alignment's alphabet.
    pub fn check_seq_type(&self, seq_type: SeqType) -> Result<()> {
        if self.seq_type() != seq_type {
            return Err(PhyloError::Configuration(format!(
                "model {self} is for {} data but the alignment is {seq_type}",
                self.seq_type()
            )));
        }
        Ok(())
    }
}

impl FromStr for Model {
    type Err = PhyloError;

    fn from_str(s: &str) -> Result<Self> {
        let mut tokens = s.split('+').map(str::trim);
        let name = tokens.next().unwrap_or_default();
        let substitution = SubstitutionModel::from_name(name)
            .ok_or_else(|| PhyloError::Configuration(format!("unknown substitution model '{name}'")))?;
        let mut model = Model::new(substitution);
        for token in tokens {
            if token.is_empty() {
                return Err(PhyloError::Configuration(format!("empty component in model '{s}'")));
            }
            match FreqType::from_suffix(token) {
                Some(ft) => {
                    if model.freq_type.is_some() {
                        return Err(PhyloError::Configuration(format!(
                            "frequency type given twice in '{s}'"
                        )));
                    }
                    model.freq_type = Some(ft);
                }
                None => {
                    model.rate_type.apply_token(token, s)?;
                }
            }
        }
        model.validate()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.substitution.name())?;
        if let Some(ft) = self.freq_type {
            write!(f, "{}", ft.suffix())?;
        }
        write!(f, "{}", self.rate_type)
    }
}

/// Tab-separated listing of the available substitution models (restricted
/// to one alphabet when `seq_type` is given), frequency types and rate
/// types, one option per line under a `kind\tname\tdescription` header.
pub fn options_table(seq_type: Option<SeqType>) -> String {
    let mut rows = vec!["kind\tname\tdescription".to_string()];
    for m in SubstitutionModel::all().filter(|m| seq_type.is_none_or(|t| m.seq_type() == t)) {
        let kind = match m.seq_type() {
            SeqType::Dna => "nucleotide",
            SeqType::Protein => "protein",
        };
        rows.push(format!("{kind}\t{}\t{}", m.name(), m.description()));
    }
    for f in FreqType::ALL {
        rows.push(format!("frequency\t{}\t{}", f.suffix(), f.description()));
    }
    for r in RateType::base_types() {
        let name = if r == RateType::default() { "E".to_string() } else { r.to_string() };
        rows.push(format!("rate\t{name}\t{}", r.description()));
    }
    rows.join("\n")
}

/// One optimisable parameter, in the transformed space the optimiser sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinate {
    /// Log of a free exchangeability class.
    Exchange(usize),
    /// Log-ratio of state `i` to the last state.
    Frequency(usize),
    /// Log of the gamma shape.
    GammaShape,
    PInvar,
    /// Log-ratio of free-rate weight `i` to the last weight.
    FreeWeight(usize),
    /// Log of free rate `i` before normalisation.
    FreeRate(usize),
}

/// Numeric state of a model during fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    pub model: Model,
    /// Value per exchangeability class; the fixed class holds 1.
    pub class_values: Vec<f64>,
    pub freqs: Vec<f64>,
    pub gamma_shape: f64,
    pub p_invar: f64,
    /// Free-rate categories, weights sum to one and mean rate is one.
    pub free_weights: Vec<f64>,
    pub free_rates: Vec<f64>,
}

impl ModelParameters {
    /// Starting values: unit exchangeabilities, empirical or equal
    /// frequencies, shape 1, and free rates spread like a gamma with shape 1.
    pub fn initial(model: Model, empirical_freqs: &[f64]) -> Self {
        let k = model.seq_type().num_states();
        let freqs = match (model.freq(), model.substitution.empirical_matrix()) {
            (FreqType::Model, Some(matrix)) => matrix.frequencies(),
            (FreqType::Equal | FreqType::Model, _) => vec![1.0 / k as f64; k],
            (FreqType::Empirical | FreqType::Optimized, _) => empirical_freqs.to_vec(),
        };
        let (free_weights, free_rates) = match model.rate_type.model {
            Some(RateModel::FreeRate(c)) => (vec![1.0 / c as f64; c], discrete_gamma(1.0, c)),
            _ => (Vec::new(), Vec::new()),
        };
        ModelParameters {
            model,
            class_values: vec![1.0; model.substitution.num_classes()],
            freqs,
            gamma_shape: 1.0,
            p_invar: if model.rate_type.invariant { 0.1 } else { 0.0 },
            free_weights,
            free_rates,
        }
    }

    pub fn num_states(&self) -> usize {
        self.freqs.len()
    }

    /// Symmetric exchangeability matrix, flat `k*i+j`.
    pub fn exchangeabilities(&self) -> Vec<f64> {
        if let Some(matrix) = self.model.substitution.empirical_matrix() {
            return matrix.exchangeabilities();
        }
        let k = self.num_states();
        let mut s = vec![1.0; k * k];
        if self.model.seq_type() == SeqType::Dna {
            let pattern = self.model.substitution.exchange_pattern();
            let pairs = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
            for ((i, j), class) in pairs.into_iter().zip(pattern) {
                s[k * i + j] = self.class_values[class];
                s[k * j + i] = self.class_values[class];
            }
        }
        for i in 0..k {
            s[k * i + i] = 0.0;
        }
        s
    }

    /// Named DNA exchangeabilities in `A-C, A-G, A-T, C-G, C-T, G-T` order.
    pub fn named_exchangeabilities(&self) -> Vec<(String, f64)> {
        if self.model.seq_type() != SeqType::Dna {
            return Vec::new();
        }
        let s = self.exchangeabilities();
        let labels = ["A-C", "A-G", "A-T", "C-G", "C-T", "G-T"];
        let pairs = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
        labels
            .iter()
            .zip(pairs)
            .map(|(l, (i, j))| (l.to_string(), s[4 * i + j]))
            .collect()
    }

    /// Rate categories implied by the current values.
    pub fn site_rates(&self) -> SiteRates {
        let p_invar = if self.model.rate_type.invariant { self.p_invar } else { 0.0 };
        match self.model.rate_type.model {
            None => SiteRates::uniform(p_invar),
            Some(RateModel::Gamma(c)) => SiteRates::gamma(self.gamma_shape, c, p_invar),
            Some(RateModel::FreeRate(_)) => {
                SiteRates::free(self.free_weights.clone(), self.free_rates.clone(), p_invar)
            }
        }
    }

    /// Parameters the optimiser may move.
    pub fn coordinates(&self) -> Vec<Coordinate> {
        let mut coords = Vec::new();
        let fixed = self.model.substitution.fixed_class();
        coords.extend(
            (0..self.class_values.len())
                .filter(|&c| c != fixed)
                .map(Coordinate::Exchange),
        );
        if self.model.freq() == FreqType::Optimized {
            coords.extend((0..self.num_states() - 1).map(Coordinate::Frequency));
        }
        if self.model.rate_type.invariant {
            coords.push(Coordinate::PInvar);
        }
        match self.model.rate_type.model {
            Some(RateModel::Gamma(_)) => coords.push(Coordinate::GammaShape),
            Some(RateModel::FreeRate(c)) => {
                coords.extend((0..c - 1).map(Coordinate::FreeWeight));
                coords.extend((0..c).map(Coordinate::FreeRate));
            }
            None => {}
        }
        coords
    }

    /// Search interval of a coordinate in transformed space.
    pub fn bounds(&self, coord: Coordinate) -> (f64, f64) {
        match coord {
            Coordinate::Exchange(_) => (MIN_EXCHANGE.ln(), MAX_EXCHANGE.ln()),
            Coordinate::Frequency(_) | Coordinate::FreeWeight(_) => (-8.0, 8.0),
            Coordinate::GammaShape => (MIN_GAMMA_SHAPE.ln(), MAX_GAMMA_SHAPE.ln()),
            Coordinate::PInvar => (0.0, MAX_P_INVAR),
            Coordinate::FreeRate(_) => (MIN_FREE_RATE.ln(), MAX_FREE_RATE.ln()),
        }
    }

    pub fn get(&self, coord: Coordinate) -> f64 {
        let k = self.num_states();
        match coord {
            Coordinate::Exchange(c) => self.class_values[c].ln(),
            Coordinate::Frequency(i) => (self.freqs[i] / self.freqs[k - 1]).ln(),
            Coordinate::GammaShape => self.gamma_shape.ln(),
            Coordinate::PInvar => self.p_invar,
            Coordinate::FreeWeight(i) => {
                let last = self.free_weights.len() - 1;
                (self.free_weights[i] / self.free_weights[last]).ln()
            }
            Coordinate::FreeRate(i) => self.free_rates[i].ln(),
        }
    }

    pub fn set(&mut self, coord: Coordinate, value: f64) {
        let k = self.num_states();
        match coord {
            Coordinate::Exchange(c) => self.class_values[c] = value.exp(),
            Coordinate::Frequency(i) => {
                let ratios: Vec<f64> = (0..k)
                    .map(|s| if s == i { value.exp() } else { self.freqs[s] / self.freqs[k - 1] })
                    .collect();
                let total: f64 = ratios.iter().sum();
                self.freqs = ratios.iter().map(|r| r / total).collect();
            }
            Coordinate::GammaShape => self.gamma_shape = value.exp(),
            Coordinate::PInvar => self.p_invar = value,
            Coordinate::FreeWeight(i) => {
                let last = self.free_weights.len() - 1;
                let ratios: Vec<f64> = (0..=last)
                    .map(|s| {
                        if s == i { value.exp() } else { self.free_weights[s] / self.free_weights[last] }
                    })
                    .collect();
                let total: f64 = ratios.iter().sum();
                self.free_weights = ratios.iter().map(|r| r / total).collect();
                self.normalize_free_rates();
            }
            Coordinate::FreeRate(i) => {
                self.free_rates[i] = value.exp();
                self.normalize_free_rates();
            }
        }
    }

    /// Rescale free rates so the weighted mean rate is one.
    fn normalize_free_rates(&mut self) {
        let mean: f64 = self.free_weights.iter().zip(&self.free_rates).map(|(w, r)| w * r).sum();
        if mean > 0.0 {
            self.free_rates.iter_mut().for_each(|r| *r /= mean);
        }
    }

    /// Order free-rate categories by increasing rate.
    pub fn sort_free_rates(&mut self) {
        let mut cats: Vec<(f64, f64)> =
            self.free_weights.iter().copied().zip(self.free_rates.iter().copied()).collect();
        cats.sort_by(|a, b| a.1.total_cmp(&b.1));
        self.free_weights = cats.iter().map(|c| c.0).collect();
        self.free_rates = cats.iter().map(|c| c.1).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_model_strings() {
        let m: Model = "GTR+F+I+G4".parse().unwrap();
        assert_eq!(m.substitution, SubstitutionModel::GTR);
        assert_eq!(m.freq_type, Some(FreqType::Empirical));
        assert!(m.rate_type.invariant);
        assert_eq!(m.rate_type.model, Some(RateModel::Gamma(4)));

        let m: Model = "K2P+R3".parse().unwrap();
        assert_eq!(m.substitution, SubstitutionModel::K80);
        assert_eq!(m.rate_type.model, Some(RateModel::FreeRate(3)));
        assert_eq!(m.to_string(), "K80+R3");
    }

    #[test]
    fn echoes_canonical_kimura_names() {
        for (given, shown) in [("K80", "K80"), ("K2P", "K80"), ("K81", "K81"), ("K3P", "K81"), ("k3pu+F", "K81u+F")] {
            assert_eq!(given.parse::<Model>().unwrap().to_string(), shown);
        }
    }

    #[test]
    fn bounds_rate_category_counts() {
        for bad in ["JC+G0", "JC+R1", "JC+G21", "JC+R21", "JC+G1000000", "JC+R10000000000000000000"] {
            assert!(
                matches!(bad.parse::<Model>(), Err(PhyloError::Configuration(_))),
                "{bad} should be rejected"
            );
        }
        let widest: Model = format!("JC+R{MAX_RATE_CATEGORIES}").parse().unwrap();
        assert_eq!(widest.num_model_params(), 2 * MAX_RATE_CATEGORIES - 2);
        assert!("JC+G20".parse::<Model>().is_ok());
    }

    #[test]
    fn empirical_protein_models() {
        let lg: Model = "LG+G4".parse().unwrap();
        assert_eq!(lg.seq_type(), SeqType::Protein);
        assert_eq!(lg.freq(), FreqType::Model);
        assert_eq!(lg.num_model_params(), 1);
        let p = ModelParameters::initial(lg, &[0.05; 20]);
        assert!(p.coordinates().iter().all(|c| *c == Coordinate::GammaShape));
        assert!((p.freqs[0] - 0.079066).abs() <= 1e-5);
        let s = p.exchangeabilities();
        assert!((s[20] - 0.425093).abs() <= 1e-12);

        let wag_f: Model = "WAG+F".parse().unwrap();
        assert_eq!(wag_f.num_model_params(), 19);
        assert_eq!(ModelParameters::initial(wag_f, &[0.05; 20]).freqs, vec![0.05; 20]);

        assert_eq!("dayhoff+FU".parse::<Model>().unwrap().to_string(), "Dayhoff+FU");
        assert!(matches!("GTR+FU".parse::<Model>(), Err(PhyloError::Configuration(_))));
        assert!(matches!("Poisson+FU".parse::<Model>(), Err(PhyloError::Configuration(_))));
    }

    #[test]
    fn every_option_is_described() {
        let models: Vec<_> = SubstitutionModel::all().collect();
        assert_eq!(models.len(), 27);
        assert!(models.iter().all(|m| !m.description().is_empty()));
        assert!(FreqType::ALL.iter().all(|f| FreqType::from_suffix(f.suffix()) == Some(*f)));
        let rates: Vec<String> = RateType::base_types().iter().map(RateType::to_string).collect();
        assert_eq!(rates, ["", "+I", "+G4", "+I+G4", "+R4", "+I+R4"]);
        assert!(RateType::base_types().iter().all(|r| !r.description().is_empty()));
    }

    #[test]
    fn round_trips_every_dna_model() {
        for sub in SubstitutionModel::DNA {
            let text = format!("{}+FO+I+R2", sub.name());
            let m: Model = text.parse().unwrap();
            assert_eq!(m.to_string(), text);
        }
    }

    #[test]
    fn rejects_unknown_components() {
        for bad in ["XYZ", "GTR+Q", "GTR+G+R", "GTR+F+FO", "GTR+I+I", "GTR+R1", "GTR+", ""] {
            assert!(
                matches!(bad.parse::<Model>(), Err(PhyloError::Configuration(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn counts_free_parameters() {
        let jc: Model = "JC".parse().unwrap();
        assert_eq!(jc.num_model_params(), 0);
        assert_eq!(jc.num_free_params(4), 5);

        let hky: Model = "HKY+G4".parse().unwrap();
        assert_eq!(hky.num_model_params(), 1 + 3 + 1);

        let gtr: Model = "GTR+F+I+R3".parse().unwrap();
        assert_eq!(gtr.num_model_params(), 5 + 3 + 1 + 4);

        let tpm2: Model = "TPM2".parse().unwrap();
        assert_eq!(tpm2.substitution.num_rate_params(), 2);
        assert_eq!(tpm2.freq(), FreqType::Equal);
    }

    #[test]
    fn exchangeability_classes_follow_pattern() {
        let m: Model = "TN".parse().unwrap();
        let mut p = ModelParameters::initial(m, &[0.25; 4]);
        p.class_values = vec![1.0, 4.0, 2.0];
        let named = p.named_exchangeabilities();
        let values: Vec<f64> = named.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1.0, 4.0, 1.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn coordinates_round_trip() {
        let m: Model = "GTR+FO+I+R3".parse().unwrap();
        let mut p = ModelParameters::initial(m, &[0.1, 0.2, 0.3, 0.4]);
        let coords = p.coordinates();
        assert_eq!(coords.len(), 5 + 3 + 1 + 2 + 3);
        p.set(Coordinate::Frequency(0), (0.5f64).ln());
        assert!((p.freqs.iter().sum::<f64>() - 1.0).abs() <= 1e-12);
        assert!((p.get(Coordinate::Frequency(0)) - 0.5f64.ln()).abs() <= 1e-12);

        p.set(Coordinate::FreeRate(2), 1.5f64.ln());
        let mean: f64 = p.free_weights.iter().zip(&p.free_rates).map(|(w, r)| w * r).sum();
        assert!((mean - 1.0).abs() <= 1e-12);
    }

    #[test]
    fn lists_options_per_alphabet() {
        let all = options_table(None);
        assert_eq!(all.lines().next(), Some("kind\tname\tdescription"));
        assert_eq!(all.lines().count(), 1 + 27 + 4 + 6);
        assert!(all.contains("protein\tLG\tGeneral matrix (Le and Gascuel, 2008)."));
        assert!(all.contains("frequency\t+FO\t"));
        assert!(all.contains("rate\tE\t"));

        let protein = options_table(Some(SeqType::Protein));
        assert!(protein.lines().all(|l| !l.starts_with("nucleotide")));
        assert_eq!(protein.lines().filter(|l| l.starts_with("protein")).count(), 5);
        let dna = options_table(Some(SeqType::Dna));
        assert_eq!(dna.lines().filter(|l| l.starts_with("nucleotide")).count(), 22);
        assert!(dna.lines().all(|l| l.split('\t').count() == 3));
    }

    #[test]
    fn rate_type_parses_suffixes() {
        assert_eq!(RateType::parse("").unwrap(), RateType::default());
        assert_eq!(RateType::parse("+I+G4").unwrap().to_string(), "+I+G4");
        assert_eq!(RateType::parse("+R2").unwrap().num_params(), 2);
        assert!(RateType::parse("+X").is_err());
    }
}
