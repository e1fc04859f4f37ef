use std::path::PathBuf;
use std::time::Instant;

use rusqlite::Connection;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::db::SqliteScoreSink;
use crate::ledger::Ledger;
use crate::queue::{FlushOutcome, QueueEvent};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub ledger: Option<Ledger>,
    events: Option<broadcast::Receiver<QueueEvent>>,
    backlog: Vec<QueueEvent>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a freshly loaded workspace, draining the previous one first.
    pub fn open(&mut self, workspace: PathBuf, db: Connection, ledger: Ledger) {
        self.teardown(Instant::now());
        let previous = self.drain_events();
        self.backlog.extend(previous);
        self.events = Some(ledger.subscribe());
        self.workspace = Some(workspace);
        self.db = Some(db);
        self.ledger = Some(ledger);
    }

    pub fn next_flush_deadline(&self) -> Option<Instant> {
        self.ledger.as_ref().and_then(|l| l.queue.next_deadline())
    }

    /// Timer path: flushes when the queue's deadline has passed.
    pub fn poll_queue(&mut self, now: Instant) -> Option<FlushOutcome> {
        let (Some(db), Some(ledger)) = (self.db.as_ref(), self.ledger.as_mut()) else {
            return None;
        };
        let mut sink = SqliteScoreSink::new(db);
        ledger.poll(&mut sink, now)
    }

    pub fn force_flush(&mut self, now: Instant) -> Option<FlushOutcome> {
        let (Some(db), Some(ledger)) = (self.db.as_ref(), self.ledger.as_mut()) else {
            return None;
        };
        let mut sink = SqliteScoreSink::new(db);
        Some(ledger.force_flush(&mut sink, now))
    }

    /// Flushes the open ledger ahead of a workspace switch. Returns the keys
    /// still unsaved afterwards; the switch must not go ahead while any remain.
    pub fn release(&mut self, now: Instant) -> Result<(), Vec<String>> {
        let outcome = self.force_flush(now);
        let Some(ledger) = self.ledger.as_ref() else {
            return Ok(());
        };
        let unsaved = ledger.queue.pending_keys();
        if unsaved.is_empty() {
            return Ok(());
        }
        warn!(
            unsaved = unsaved.len(),
            keys = ?unsaved,
            outcome = ?outcome,
            "workspace still holds unsaved scores"
        );
        Err(unsaved)
    }

    /// Best-effort drain before the ledger is discarded.
    pub fn teardown(&mut self, now: Instant) {
        match self.force_flush(now) {
            Some(FlushOutcome::Failed {
                restored, message, ..
            }) => {
                let keys = self
                    .ledger
                    .as_ref()
                    .map(|l| l.queue.pending_keys())
                    .unwrap_or_default();
                warn!(unsaved = restored, keys = ?keys, error = %message, "teardown flush failed");
            }
            Some(FlushOutcome::Persisted { written, .. }) => {
                info!(written, "teardown flush persisted pending scores");
            }
            _ => {}
        }
    }

    /// Events published since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<QueueEvent> {
        let mut out = std::mem::take(&mut self.backlog);
        let Some(rx) = self.events.as_mut() else {
            return out;
        };
        loop {
            match rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event receiver lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::PendingWrite;
    use crate::queue::QueueTiming;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn opened(prefix: &str) -> AppState {
        let dir = temp_dir(prefix);
        let conn = db::open_db(&dir).expect("open");
        let mut state = AppState::new();
        state.open(dir, conn, Ledger::new(QueueTiming::default()));
        state
    }

    fn enqueue(state: &mut AppState, student: &str, score: f64) {
        state.ledger.as_mut().expect("ledger").queue.enqueue(
            PendingWrite {
                student_id: student.to_string(),
                assessment_id: "q1".to_string(),
                score: Some(score),
            },
            Instant::now(),
        );
    }

    #[test]
    fn release_saves_pending_scores() {
        let mut state = opened("gradeledger-release-ok");
        enqueue(&mut state, "s1", 4.0);
        assert_eq!(state.release(Instant::now()), Ok(()));

        let conn = state.db.as_ref().expect("db");
        let rows = db::load_scores(conn).expect("load");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, Some(4.0));
    }

    #[test]
    fn release_reports_scores_it_could_not_save() {
        let mut state = opened("gradeledger-release-failed");
        state
            .db
            .as_ref()
            .expect("db")
            .execute("DROP TABLE scores", [])
            .expect("drop");
        enqueue(&mut state, "s2", 1.0);
        enqueue(&mut state, "s1", 2.0);

        assert_eq!(
            state.release(Instant::now()),
            Err(vec!["s1:q1".to_string(), "s2:q1".to_string()])
        );
        // The writes stay queued for the retry.
        assert_eq!(state.ledger.as_ref().map(|l| l.queue.pending_len()), Some(2));
    }

    #[test]
    fn release_without_a_workspace_is_a_no_op() {
        let mut state = AppState::new();
        assert_eq!(state.release(Instant::now()), Ok(()));
    }
}
