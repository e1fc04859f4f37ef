use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::queue::{QueueTiming, DEFAULT_DEBOUNCE_MS, DEFAULT_RETRY_BACKOFF_MS};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Clone, Copy)]
enum SetupSection {
    Queue,
}

impl SetupSection {
    const ALL: [SetupSection; 1] = [SetupSection::Queue];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "queue" => Some(Self::Queue),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Queue => "queue",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Queue => "setup.queue",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Queue => json!({
            "debounceMs": DEFAULT_DEBOUNCE_MS,
            "retryBackoffMs": DEFAULT_RETRY_BACKOFF_MS
        }),
    }
}

fn parse_u64_range(v: &Value, key: &str, min: u64, max: u64) -> Result<u64, String> {
    let n = v
        .as_u64()
        .ok_or_else(|| format!("{} must be a non-negative integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Queue => match k.as_str() {
                "debounceMs" => {
                    obj.insert(k.clone(), Value::from(parse_u64_range(v, k, 10, 60_000)?));
                }
                "retryBackoffMs" => {
                    obj.insert(k.clone(), Value::from(parse_u64_range(v, k, 10, 600_000)?));
                }
                _ => return Err(format!("unknown queue field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Stale or hand-edited values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                if let Err(e) = merge_section_patch(section, &mut current, &one) {
                    warn!(key = section.key(), field = %k, error = %e, "ignoring invalid saved setup field");
                }
            }
        }
    }
    Ok(current)
}

fn timing_from_section(section: &Value) -> QueueTiming {
    QueueTiming {
        debounce_ms: section
            .get("debounceMs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_DEBOUNCE_MS),
        retry_backoff_ms: section
            .get("retryBackoffMs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
    }
}

/// Queue timing saved in the workspace, defaults where unset.
pub fn load_queue_timing(conn: &Connection) -> anyhow::Result<QueueTiming> {
    Ok(timing_from_section(&load_section(conn, SetupSection::Queue)?))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match section {
        SetupSection::Queue => {
            let timing = timing_from_section(&current);
            if let Some(ledger) = state.ledger.as_mut() {
                ledger.queue.set_timing(timing);
            }
            info!(
                debounce_ms = timing.debounce_ms,
                retry_backoff_ms = timing.retry_backoff_ms,
                "queue timing updated"
            );
        }
    }
    ok(&req.id, json!({ "ok": true, "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
