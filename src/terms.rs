use crate::model::{Assessment, Term, TermConfig};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

pub const MAX_TRANSMUTATION_BASE: f64 = 75.0;
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("category weights must sum to 100 (got {sum})")]
    WeightSum { sum: f64 },
    #[error("weight {name} must be a finite number >= 0")]
    BadWeight { name: &'static str },
    #[error("assessment id must not be empty")]
    MissingId,
    #[error("duplicate assessment id {0}")]
    DuplicateId(String),
    #[error("assessment {id}: maxScore must be a finite number > 0")]
    BadMaxScore { id: String },
    #[error("assessment {id}: transmutationBase must be within [0, 75]")]
    BadTransmutationBase { id: String },
}

/// Checks the invariants the configuration editor is expected to uphold.
pub fn validate_term_config(cfg: &TermConfig) -> Result<(), ConfigError> {
    for (name, w) in [
        ("ptWeight", cfg.pt_weight),
        ("quizWeight", cfg.quiz_weight),
        ("examWeight", cfg.exam_weight),
    ] {
        if !w.is_finite() || w < 0.0 {
            return Err(ConfigError::BadWeight { name });
        }
    }
    let sum = cfg.pt_weight + cfg.quiz_weight + cfg.exam_weight;
    if (sum - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::WeightSum { sum });
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for a in &cfg.assessments {
        validate_assessment(a)?;
        if !seen.insert(a.id.as_str()) {
            return Err(ConfigError::DuplicateId(a.id.clone()));
        }
    }
    Ok(())
}

fn validate_assessment(a: &Assessment) -> Result<(), ConfigError> {
    if a.id.trim().is_empty() {
        return Err(ConfigError::MissingId);
    }
    if !a.max_score.is_finite() || a.max_score <= 0.0 {
        return Err(ConfigError::BadMaxScore { id: a.id.clone() });
    }
    let base = a.transmutation_base;
    if !base.is_finite() || !(0.0..=MAX_TRANSMUTATION_BASE).contains(&base) {
        return Err(ConfigError::BadTransmutationBase { id: a.id.clone() });
    }
    Ok(())
}

/// Read-mostly holder of the per-term configuration.
#[derive(Debug, Default, Clone)]
pub struct TermConfigStore {
    terms: BTreeMap<Term, TermConfig>,
}

impl TermConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a term's configuration, replacing any previous one.
    /// Assessment ids must stay unique across terms.
    pub fn replace(&mut self, cfg: TermConfig) -> Result<(), ConfigError> {
        validate_term_config(&cfg)?;
        for (term, other) in &self.terms {
            if *term == cfg.term {
                continue;
            }
            if let Some(dup) = cfg.assessments.iter().find(|a| other.find(&a.id).is_some()) {
                return Err(ConfigError::DuplicateId(dup.id.clone()));
            }
        }
        let mut cfg = cfg;
        cfg.assessments.sort_by_key(|a| a.order);
        self.terms.insert(cfg.term, cfg);
        Ok(())
    }

    pub fn get(&self, term: Term) -> Option<&TermConfig> {
        self.terms.get(&term)
    }

    pub fn all(&self) -> impl Iterator<Item = &TermConfig> {
        self.terms.values()
    }

    /// Looks an assessment up across every term.
    pub fn assessment(&self, assessment_id: &str) -> Option<&Assessment> {
        self.terms.values().find_map(|cfg| cfg.find(assessment_id))
    }
}
