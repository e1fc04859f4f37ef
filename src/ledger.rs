use crate::calc::{self, DerivedTermGrade, FinalGrade, ScoreSource};
use crate::model::{Assessment, Term};
use crate::queue::{FlushOutcome, QueueEvent, QueueTiming, ScoreSink, WriteQueue};
use crate::scores::{CriteriaStore, ScoreError, ScoreStore, SetScoreOutcome};
use crate::terms::TermConfigStore;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::broadcast;

/// Owned state behind one open workspace.
pub struct Ledger {
    pub terms: TermConfigStore,
    pub scores: ScoreStore,
    pub criteria: CriteriaStore,
    pub queue: WriteQueue,
}

impl ScoreSource for Ledger {
    fn effective_score(&self, student_id: &str, assessment: &Assessment) -> Option<f64> {
        self.scores
            .effective_score(student_id, assessment, &self.criteria)
    }
}

impl Ledger {
    pub fn new(timing: QueueTiming) -> Self {
        Self {
            terms: TermConfigStore::new(),
            scores: ScoreStore::new(),
            criteria: CriteriaStore::new(),
            queue: WriteQueue::new(timing),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    pub fn set_score(
        &mut self,
        student_id: &str,
        assessment_id: &str,
        raw: Option<f64>,
        now: Instant,
    ) -> Result<SetScoreOutcome, ScoreError> {
        let assessment = self
            .terms
            .assessment(assessment_id)
            .ok_or_else(|| ScoreError::UnknownAssessment(assessment_id.to_string()))?;
        self.scores
            .set_score(student_id, assessment, raw, &mut self.queue, now)
    }

    pub fn get_score(&self, student_id: &str, assessment_id: &str) -> Option<f64> {
        self.scores.get_score(student_id, assessment_id)
    }

    pub fn term_grade(&self, student_id: &str, term: Term) -> DerivedTermGrade {
        match self.terms.get(term) {
            Some(cfg) => calc::term_grade(self, student_id, cfg),
            None => DerivedTermGrade::pending(term),
        }
    }

    pub fn term_grades(&self, student_id: &str) -> BTreeMap<Term, DerivedTermGrade> {
        Term::ALL
            .iter()
            .map(|t| (*t, self.term_grade(student_id, *t)))
            .collect()
    }

    pub fn final_grade(&self, student_id: &str) -> FinalGrade {
        calc::final_grade(&self.term_grades(student_id))
    }

    pub fn poll(&mut self, sink: &mut dyn ScoreSink, now: Instant) -> Option<FlushOutcome> {
        self.queue.poll(sink, now)
    }

    pub fn force_flush(&mut self, sink: &mut dyn ScoreSink, now: Instant) -> FlushOutcome {
        self.queue.force_flush(sink, now)
    }
}
