//! Write-coalescing persistence queue.
//!
//! Edits land in `pending` keyed by `studentId:assessmentId`; the last value
//! per key wins. A single deadline owned by the queue drives the flush: every
//! enqueue pushes it out by the debounce interval, a failed flush moves it to
//! the retry back-off. The host event loop sleeps until `next_deadline()` and
//! then calls `poll`.
//!
//! A flush is a two-phase commit. `take_batch` snapshots and clears the
//! pending map so edits made while the batch is out start a fresh map;
//! `complete` either discards the snapshot or folds it back underneath any
//! newer edits. At most one batch is out at a time.

use crate::model::PendingWrite;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 5000;
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTiming {
    pub debounce_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for QueueTiming {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl QueueTiming {
    fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Failure of the remote bulk upsert. The whole batch failed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("score store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Remote store accepting one batch of score writes at a time.
pub trait ScoreSink {
    fn bulk_upsert(&mut self, writes: &[PendingWrite]) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("studentId is missing")]
    MissingStudentId,
    #[error("assessmentId is missing")]
    MissingAssessmentId,
    #[error("score is not a finite number")]
    NonFiniteScore,
    #[error("score is negative")]
    NegativeScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedWrite {
    #[serde(flatten)]
    pub write: PendingWrite,
    pub code: RejectReason,
    pub message: String,
}

fn check_write(w: &PendingWrite) -> Result<(), RejectReason> {
    if w.student_id.trim().is_empty() {
        return Err(RejectReason::MissingStudentId);
    }
    if w.assessment_id.trim().is_empty() {
        return Err(RejectReason::MissingAssessmentId);
    }
    match w.score {
        None => Ok(()),
        Some(s) if !s.is_finite() => Err(RejectReason::NonFiniteScore),
        Some(s) if s < 0.0 => Err(RejectReason::NegativeScore),
        Some(_) => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradesUpdated {
    pub batch_id: String,
    pub written: usize,
    pub student_ids: Vec<String>,
    pub flushed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushFailure {
    pub batch_id: String,
    pub message: String,
    pub restored: usize,
    pub retry_in_ms: u64,
}

/// Broadcast to observers after each completed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum QueueEvent {
    #[serde(rename = "grades.updated")]
    GradesUpdated(GradesUpdated),
    #[serde(rename = "queue.flushFailed")]
    FlushFailed(FlushFailure),
    #[serde(rename = "queue.writesRejected")]
    WritesRejected { rejected: Vec<RejectedWrite> },
}

/// A snapshot taken out of the queue by `take_batch`.
#[derive(Debug)]
pub struct FlushBatch {
    id: String,
    valid: Vec<PendingWrite>,
    rejected: Vec<RejectedWrite>,
}

impl FlushBatch {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The writes to submit; malformed entries are already filtered out.
    pub fn writes(&self) -> &[PendingWrite] {
        &self.valid
    }

    pub fn rejected(&self) -> &[RejectedWrite] {
        &self.rejected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Nothing pending; no remote call was made.
    Empty,
    /// A batch is already out; the pending writes will follow it.
    InFlight,
    #[serde(rename_all = "camelCase")]
    Persisted {
        batch_id: String,
        written: usize,
        rejected: Vec<RejectedWrite>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        batch_id: String,
        restored: usize,
        retry_in_ms: u64,
        message: String,
        rejected: Vec<RejectedWrite>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub remote_calls: u64,
    pub flushes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub last_error: Option<String>,
}

pub struct WriteQueue {
    pending: BTreeMap<String, PendingWrite>,
    in_flight: bool,
    deadline: Option<Instant>,
    timing: QueueTiming,
    stats: QueueStats,
    events: broadcast::Sender<QueueEvent>,
}

impl WriteQueue {
    pub fn new(timing: QueueTiming) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pending: BTreeMap::new(),
            in_flight: false,
            deadline: None,
            timing,
            stats: QueueStats::default(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn timing(&self) -> QueueTiming {
        self.timing
    }

    /// New timing applies from the next enqueue or failure onwards.
    pub fn set_timing(&mut self, timing: QueueTiming) {
        self.timing = timing;
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn pending(&self, key: &str) -> Option<&PendingWrite> {
        self.pending.get(key)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map(|d| d <= now).unwrap_or(false)
    }

    /// Upserts the write under its key and restarts the debounce timer.
    pub fn enqueue(&mut self, write: PendingWrite, now: Instant) {
        let key = write.key();
        debug!(%key, score = ?write.score, "enqueue score write");
        self.pending.insert(key, write);
        self.deadline = Some(now + self.timing.debounce());
    }

    /// Phase one: snapshot and clear the pending map.
    pub fn take_batch(&mut self) -> Option<FlushBatch> {
        if self.in_flight {
            return None;
        }
        if self.pending.is_empty() {
            self.deadline = None;
            return None;
        }
        self.deadline = None;
        self.in_flight = true;

        let snapshot = std::mem::take(&mut self.pending);
        let mut valid = Vec::with_capacity(snapshot.len());
        let mut rejected = Vec::new();
        for write in snapshot.into_values() {
            match check_write(&write) {
                Ok(()) => valid.push(write),
                Err(code) => rejected.push(RejectedWrite {
                    message: code.to_string(),
                    write,
                    code,
                }),
            }
        }
        Some(FlushBatch {
            id: Uuid::new_v4().to_string(),
            valid,
            rejected,
        })
    }

    /// Phase two: settle a batch with the remote store's verdict.
    pub fn complete(
        &mut self,
        batch: FlushBatch,
        result: Result<(), SinkError>,
        now: Instant,
    ) -> FlushOutcome {
        self.in_flight = false;
        let FlushBatch {
            id: batch_id,
            valid,
            rejected,
        } = batch;

        if !rejected.is_empty() {
            for r in &rejected {
                error!(
                    batch = %batch_id,
                    key = %r.write.key(),
                    reason = %r.message,
                    "dropping malformed score write"
                );
            }
            self.stats.rejected += rejected.len() as u64;
            self.publish(QueueEvent::WritesRejected {
                rejected: rejected.clone(),
            });
        }

        match result {
            Ok(()) => {
                let written = valid.len();
                if written > 0 {
                    self.stats.flushes += 1;
                    let student_ids: BTreeSet<String> =
                        valid.iter().map(|w| w.student_id.clone()).collect();
                    info!(batch = %batch_id, written, "score batch persisted");
                    self.publish(QueueEvent::GradesUpdated(GradesUpdated {
                        batch_id: batch_id.clone(),
                        written,
                        student_ids: student_ids.into_iter().collect(),
                        flushed_at: chrono::Utc::now().to_rfc3339(),
                    }));
                }
                FlushOutcome::Persisted {
                    batch_id,
                    written,
                    rejected,
                }
            }
            Err(e) => {
                let message = e.to_string();
                let restored = valid.len();
                // Writes that arrived while the batch was out are newer.
                for write in valid {
                    self.pending.entry(write.key()).or_insert(write);
                }
                let retry_in = self.timing.retry_backoff();
                self.deadline = Some(now + retry_in);
                self.stats.failures += 1;
                self.stats.last_error = Some(message.clone());
                warn!(
                    batch = %batch_id,
                    restored,
                    retry_in_ms = self.timing.retry_backoff_ms,
                    error = %message,
                    "score batch failed; scheduled retry"
                );
                self.publish(QueueEvent::FlushFailed(FlushFailure {
                    batch_id: batch_id.clone(),
                    message: message.clone(),
                    restored,
                    retry_in_ms: self.timing.retry_backoff_ms,
                }));
                FlushOutcome::Failed {
                    batch_id,
                    restored,
                    retry_in_ms: self.timing.retry_backoff_ms,
                    message,
                    rejected,
                }
            }
        }
    }

    /// Takes a batch, submits it, and settles it.
    pub fn flush(&mut self, sink: &mut dyn ScoreSink, now: Instant) -> FlushOutcome {
        if self.in_flight {
            return FlushOutcome::InFlight;
        }
        let Some(batch) = self.take_batch() else {
            return FlushOutcome::Empty;
        };
        debug!(
            batch = %batch.id(),
            writes = batch.writes().len(),
            rejected = batch.rejected().len(),
            "submitting score batch"
        );
        let result = if batch.writes().is_empty() {
            Ok(())
        } else {
            self.stats.remote_calls += 1;
            sink.bulk_upsert(batch.writes())
        };
        self.complete(batch, result, now)
    }

    /// Flushes when the timer has fired.
    pub fn poll(&mut self, sink: &mut dyn ScoreSink, now: Instant) -> Option<FlushOutcome> {
        if !self.is_due(now) {
            return None;
        }
        Some(self.flush(sink, now))
    }

    /// Teardown drain: cancels the idle timer and flushes now. An outstanding
    /// batch is left alone; pending writes become due immediately after it.
    pub fn force_flush(&mut self, sink: &mut dyn ScoreSink, now: Instant) -> FlushOutcome {
        self.deadline = None;
        if self.in_flight {
            if !self.pending.is_empty() {
                self.deadline = Some(now);
            }
            return FlushOutcome::InFlight;
        }
        self.flush(sink, now)
    }

    fn publish(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
