use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_queue_timing;
use crate::ipc::types::{AppState, Request};
use crate::ledger::Ledger;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Builds the in-memory ledger from what the workspace has persisted.
fn load_ledger(conn: &Connection) -> anyhow::Result<Ledger> {
    let mut ledger = Ledger::new(load_queue_timing(conn)?);
    for cfg in db::load_term_configs(conn)? {
        let term = cfg.term;
        // A term the store refuses is left unconfigured rather than blocking the open.
        if let Err(e) = ledger.terms.replace(cfg) {
            warn!(%term, error = %e, "ignoring invalid saved term config");
        }
    }
    for w in db::load_scores(conn)? {
        ledger
            .scores
            .hydrate(&w.student_id, &w.assessment_id, w.score);
    }
    for (criteria_id, student_id, percent) in db::load_criteria_results(conn)? {
        ledger.criteria.set(&criteria_id, &student_id, Some(percent));
    }
    Ok(ledger)
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // The new ledger is read from disk, so the old one must be fully saved
    // first, including when the same path is selected again.
    if let Err(unsaved) = state.release(Instant::now()) {
        return err(
            &req.id,
            "db_update_failed",
            format!(
                "{} unsaved score(s) in the open workspace; not switching",
                unsaved.len()
            ),
            Some(json!({ "unsaved": unsaved })),
        );
    }

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let ledger = match load_ledger(&conn) {
        Ok(l) => l,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let scores = ledger.scores.len();
    let terms = ledger.terms.all().count();
    state.open(path.clone(), conn, ledger);
    info!(workspace = %path.display(), scores, terms, "workspace opened");

    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "scores": scores,
            "terms": terms
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
