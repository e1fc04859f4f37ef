use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{no_workspace, required_str, score_param, score_value, workspace};
use crate::ipc::types::{AppState, Request};
use crate::queue::FlushOutcome;
use serde_json::json;
use std::time::Instant;

const SCORES_BULK_SET_MAX_EDITS: usize = 5000;

fn scores_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let assessment_id = required_str(&req.params, "assessmentId")?;
    let raw = score_param(&req.params, "score")?;
    let (_, ledger) = workspace(state)?;
    let outcome = ledger.set_score(student_id, assessment_id, raw, Instant::now())?;
    Ok(json!(outcome))
}

fn scores_bulk_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(edits) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing edits[]"));
    };
    let (_, ledger) = workspace(state)?;

    if edits.len() > SCORES_BULK_SET_MAX_EDITS {
        let rejected = edits.len();
        return Ok(json!({
            "updated": 0,
            "rejected": rejected,
            "limitExceeded": true,
            "errors": [{
                "index": -1,
                "code": "too_many_edits",
                "message": format!(
                    "bulk payload exceeds max edits: {} > {}",
                    rejected, SCORES_BULK_SET_MAX_EDITS
                )
            }]
        }));
    }

    let now = Instant::now();
    let mut updated = 0usize;
    let mut clamped = 0usize;
    let mut warnings: Vec<String> = Vec::new();
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, edit) in edits.iter().enumerate() {
        let applied = required_str(edit, "studentId").and_then(|student_id| {
            let assessment_id = required_str(edit, "assessmentId")?;
            let raw = match edit.get("score") {
                Some(v) => score_value(v)?,
                None => None,
            };
            Ok(ledger.set_score(student_id, assessment_id, raw, now)?)
        });
        match applied {
            Ok(outcome) => {
                updated += 1;
                if outcome.clamped {
                    clamped += 1;
                }
                warnings.extend(outcome.warning);
            }
            Err(e) => errors.push(json!({
                "index": i,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    Ok(json!({
        "updated": updated,
        "clamped": clamped,
        "rejected": errors.len(),
        "errors": errors,
        "warnings": warnings,
    }))
}

fn scores_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let assessment_id = required_str(&req.params, "assessmentId")?;
    let (_, ledger) = workspace(state)?;
    let Some(assessment) = ledger.terms.assessment(assessment_id) else {
        return Err(HandlerErr::new("not_found", "assessment not found")
            .with_details(json!({ "assessmentId": assessment_id })));
    };
    let effective = ledger
        .scores
        .effective_score(student_id, assessment, &ledger.criteria);
    Ok(json!({
        "score": ledger.get_score(student_id, assessment_id),
        "effectiveScore": effective,
        "linked": assessment.linked_external_id.is_some(),
    }))
}

fn scores_flush(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    if state.ledger.is_none() {
        return Err(no_workspace());
    }
    let outcome = state
        .force_flush(Instant::now())
        .unwrap_or(FlushOutcome::Empty);
    let pending = state.ledger.as_ref().map_or(0, |l| l.queue.pending_len());
    Ok(json!({ "outcome": outcome, "pending": pending }))
}

fn queue_status(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let (_, ledger) = workspace(state)?;
    let q = &ledger.queue;
    let next_flush_in_ms = q
        .next_deadline()
        .map(|d| d.saturating_duration_since(Instant::now()).as_millis() as u64);
    Ok(json!({
        "pending": q.pending_len(),
        "inFlight": q.is_in_flight(),
        "nextFlushInMs": next_flush_in_ms,
        "timing": q.timing(),
        "stats": q.stats(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "scores.set" => scores_set(state, req),
        "scores.bulkSet" => scores_bulk_set(state, req),
        "scores.get" => scores_get(state, req),
        "scores.flush" => scores_flush(state),
        "queue.status" => queue_status(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
