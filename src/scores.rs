use crate::model::{round_off_2_decimals, Assessment, PendingWrite};
use crate::queue::WriteQueue;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use thiserror::Error;
use tracing::warn;

/// External criteria (rubric) results, 0-100 per student.
pub trait CriteriaSource {
    fn percentage(&self, criteria_id: &str, student_id: &str) -> Option<f64>;
}

#[derive(Debug, Default, Clone)]
pub struct CriteriaStore {
    results: HashMap<(String, String), f64>,
}

impl CriteriaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, criteria_id: &str, student_id: &str, percent: Option<f64>) {
        let key = (criteria_id.to_string(), student_id.to_string());
        match percent {
            Some(p) => {
                self.results.insert(key, p);
            }
            None => {
                self.results.remove(&key);
            }
        }
    }
}

impl CriteriaSource for CriteriaStore {
    fn percentage(&self, criteria_id: &str, student_id: &str) -> Option<f64> {
        self.results
            .get(&(criteria_id.to_string(), student_id.to_string()))
            .copied()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    #[error("studentId must not be empty")]
    MissingStudentId,
    #[error("unknown assessment {0}")]
    UnknownAssessment(String),
    #[error("score must be a finite number")]
    NotFinite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetScoreOutcome {
    pub score: Option<f64>,
    pub clamped: bool,
    /// Present only the first time a given message is produced this session.
    pub warning: Option<String>,
}

/// In-memory (student, assessment) -> score map the UI reads synchronously.
#[derive(Debug, Default)]
pub struct ScoreStore {
    scores: HashMap<(String, String), f64>,
    shown_warnings: HashSet<String>,
}

impl ScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a persisted value without queueing a write.
    pub fn hydrate(&mut self, student_id: &str, assessment_id: &str, score: Option<f64>) {
        let key = (student_id.to_string(), assessment_id.to_string());
        match score {
            Some(v) => {
                self.scores.insert(key, v);
            }
            None => {
                self.scores.remove(&key);
            }
        }
    }

    /// Validates, clamps into `[0, maxScore]`, stores, and always enqueues.
    pub fn set_score(
        &mut self,
        student_id: &str,
        assessment: &Assessment,
        raw: Option<f64>,
        queue: &mut WriteQueue,
        now: Instant,
    ) -> Result<SetScoreOutcome, ScoreError> {
        if student_id.trim().is_empty() {
            return Err(ScoreError::MissingStudentId);
        }
        let mut warning = None;
        let mut clamped = false;
        let score = match raw {
            None => None,
            Some(v) if !v.is_finite() => {
                warn!(student = student_id, assessment = %assessment.id, "rejecting non-finite score");
                return Err(ScoreError::NotFinite);
            }
            Some(v) if v < 0.0 => {
                clamped = true;
                warning = Some("Scores cannot be negative; the score was set to 0.".to_string());
                Some(0.0)
            }
            Some(v) if v > assessment.max_score => {
                clamped = true;
                warning = Some(format!(
                    "Score exceeds the maximum of {} for {}; it was set to {}.",
                    assessment.max_score, assessment.name, assessment.max_score
                ));
                Some(assessment.max_score)
            }
            Some(v) => Some(v),
        };
        if let Some(msg) = &warning {
            warn!(student = student_id, assessment = %assessment.id, raw = ?raw, "clamped score: {}", msg);
        }
        let warning = warning.filter(|msg| self.shown_warnings.insert(msg.clone()));

        self.hydrate(student_id, &assessment.id, score);
        queue.enqueue(
            PendingWrite {
                student_id: student_id.to_string(),
                assessment_id: assessment.id.clone(),
                score,
            },
            now,
        );
        Ok(SetScoreOutcome {
            score,
            clamped,
            warning,
        })
    }

    pub fn get_score(&self, student_id: &str, assessment_id: &str) -> Option<f64> {
        self.scores
            .get(&(student_id.to_string(), assessment_id.to_string()))
            .copied()
    }

    /// Linked assessments read the criteria percentage scaled to `maxScore`;
    /// this path never writes.
    pub fn effective_score(
        &self,
        student_id: &str,
        assessment: &Assessment,
        criteria: &dyn CriteriaSource,
    ) -> Option<f64> {
        let Some(criteria_id) = assessment.linked_external_id.as_deref() else {
            return self.get_score(student_id, &assessment.id);
        };
        let pct = criteria.percentage(criteria_id, student_id)?;
        if pct.is_nan() {
            return None;
        }
        let clamped = pct.clamp(0.0, 100.0);
        Some(round_off_2_decimals(clamped / 100.0 * assessment.max_score))
    }

    pub fn student_ids(&self) -> BTreeSet<&str> {
        self.scores.keys().map(|(s, _)| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }
}
