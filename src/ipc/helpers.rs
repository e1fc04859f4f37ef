use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::ledger::Ledger;
use crate::model::Term;
use crate::scores::ScoreError;
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn no_workspace() -> HandlerErr {
    HandlerErr::new("no_workspace", "select a workspace first")
}

/// Both halves of an open workspace, or `no_workspace`.
pub fn workspace(state: &mut AppState) -> Result<(&Connection, &mut Ledger), HandlerErr> {
    match (state.db.as_ref(), state.ledger.as_mut()) {
        (Some(conn), Some(ledger)) => Ok((conn, ledger)),
        _ => Err(no_workspace()),
    }
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing params.{}", key)))
}

/// Accepts `"T2"`, `"t2"`, `"2"` or the number `2`.
pub fn term_param(params: &Value) -> Result<Term, HandlerErr> {
    let parsed = match params.get("term") {
        Some(Value::String(s)) => Term::parse(s),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| Term::parse(&n.to_string())),
        _ => return Err(HandlerErr::new("bad_params", "missing params.term")),
    };
    parsed.ok_or_else(|| {
        HandlerErr::new("bad_params", "term must be one of: T1, T2, T3, T4")
            .with_details(json!({ "term": params.get("term") }))
    })
}

/// Score cell value: number, numeric string, or null/blank to clear.
pub fn score_value(v: &Value) -> Result<Option<f64>, HandlerErr> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::new("invalid_score", "score is not representable")),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>().map(Some).map_err(|_| {
                HandlerErr::new("invalid_score", "score must be numeric")
                    .with_details(json!({ "score": s }))
            })
        }
        other => Err(HandlerErr::new("invalid_score", "score must be numeric")
            .with_details(json!({ "score": other }))),
    }
}

pub fn score_param(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Err(HandlerErr::new(
            "bad_params",
            format!("missing params.{}", key),
        ));
    };
    score_value(v)
}

impl From<ScoreError> for HandlerErr {
    fn from(e: ScoreError) -> Self {
        let code = match e {
            ScoreError::MissingStudentId => "bad_params",
            ScoreError::UnknownAssessment(_) => "not_found",
            ScoreError::NotFinite => "invalid_score",
        };
        HandlerErr::new(code, e.to_string())
    }
}
