use crate::db;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{required_str, term_param, workspace};
use crate::ipc::types::{AppState, Request};
use crate::model::{Term, TermConfig};
use serde_json::json;
use tracing::info;

fn terms_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let (_, ledger) = workspace(state)?;
    let terms: Vec<serde_json::Value> = Term::ALL
        .iter()
        .map(|t| match ledger.terms.get(*t) {
            Some(cfg) => json!({
                "term": t,
                "configured": true,
                "ptWeight": cfg.pt_weight,
                "quizWeight": cfg.quiz_weight,
                "examWeight": cfg.exam_weight,
                "assessmentCount": cfg.assessments.len(),
            }),
            None => json!({ "term": t, "configured": false }),
        })
        .collect();
    Ok(json!({ "terms": terms }))
}

fn terms_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let term = term_param(&req.params)?;
    let (_, ledger) = workspace(state)?;
    match ledger.terms.get(term) {
        Some(cfg) => Ok(json!({ "configured": true, "config": cfg })),
        None => Ok(json!({ "configured": false, "config": TermConfig::empty(term) })),
    }
}

fn terms_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let term = term_param(&req.params)?;
    let mut raw = req.params.clone();
    raw["term"] = json!(term);
    let cfg: TermConfig = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid term config: {}", e)))?;

    let (conn, ledger) = workspace(state)?;
    let mut next = ledger.terms.clone();
    next.replace(cfg.clone())
        .map_err(|e| HandlerErr::new("invalid_config", e.to_string()))?;
    db::save_term_config(conn, &cfg)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    ledger.terms = next;
    info!(%term, assessments = cfg.assessments.len(), "term config replaced");

    let saved = ledger.terms.get(term);
    Ok(json!({ "ok": true, "config": saved }))
}

fn criteria_set_result(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let criteria_id = required_str(&req.params, "criteriaId")?.trim().to_string();
    let student_id = required_str(&req.params, "studentId")?.trim().to_string();
    if criteria_id.is_empty() || student_id.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "criteriaId and studentId must not be empty",
        ));
    }
    let percent = match req.params.get("percent") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_f64() {
            Some(p) if p.is_finite() => Some(p),
            _ => {
                return Err(HandlerErr::new("bad_params", "percent must be a number or null")
                    .with_details(json!({ "percent": v })))
            }
        },
    };

    let (conn, ledger) = workspace(state)?;
    db::save_criteria_result(conn, &criteria_id, &student_id, percent)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    ledger.criteria.set(&criteria_id, &student_id, percent);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "terms.list" => terms_list(state),
        "terms.get" => terms_get(state, req),
        "terms.set" => terms_set(state, req),
        "criteria.setResult" => criteria_set_result(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
