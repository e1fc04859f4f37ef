use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{required_str, term_param, workspace};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn student_param(req: &Request) -> Result<&str, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    if student_id.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "studentId must not be empty"));
    }
    Ok(student_id)
}

fn grades_term(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = student_param(req)?;
    let term = term_param(&req.params)?;
    let (_, ledger) = workspace(state)?;
    Ok(json!(ledger.term_grade(student_id, term)))
}

fn grades_final(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = student_param(req)?;
    let (_, ledger) = workspace(state)?;
    Ok(json!(ledger.final_grade(student_id)))
}

fn grades_student(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = student_param(req)?;
    let (_, ledger) = workspace(state)?;
    let terms: Vec<_> = ledger.term_grades(student_id).into_values().collect();
    Ok(json!({
        "studentId": student_id,
        "terms": terms,
        "final": ledger.final_grade(student_id),
    }))
}

/// One row per student with any stored score, ordered by student id.
fn grades_summary(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let term = term_param(&req.params)?;
    let (_, ledger) = workspace(state)?;
    let rows: Vec<serde_json::Value> = ledger
        .scores
        .student_ids()
        .into_iter()
        .map(|student_id| {
            json!({
                "studentId": student_id,
                "grade": ledger.term_grade(student_id, term),
            })
        })
        .collect();
    Ok(json!({ "term": term, "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.term" => grades_term(state, req),
        "grades.final" => grades_final(state, req),
        "grades.student" => grades_student(state, req),
        "grades.summary" => grades_summary(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
