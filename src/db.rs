use crate::model::{Assessment, Category, PendingWrite, Term, TermConfig};
use crate::queue::{ScoreSink, SinkError};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "gradeledger.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_configs(
            term TEXT PRIMARY KEY,
            pt_weight REAL NOT NULL,
            quiz_weight REAL NOT NULL,
            exam_weight REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            term TEXT NOT NULL,
            category TEXT NOT NULL,
            name TEXT NOT NULL,
            max_score REAL NOT NULL,
            transmutation_base REAL NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            linked_criteria_id TEXT,
            FOREIGN KEY(term) REFERENCES term_configs(term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_term ON assessments(term, sort_order)",
        [],
    )?;

    // No foreign key to assessments: a score may outlive a reconfigured term.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            assessment_id TEXT NOT NULL,
            score REAL,
            updated_at TEXT NOT NULL,
            UNIQUE(student_id, assessment_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria_results(
            criteria_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            percent REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(criteria_id, student_id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn load_term_configs(conn: &Connection) -> anyhow::Result<Vec<TermConfig>> {
    let mut term_stmt = conn.prepare(
        "SELECT term, pt_weight, quiz_weight, exam_weight FROM term_configs ORDER BY term",
    )?;
    let rows = term_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut assess_stmt = conn.prepare(
        "SELECT id, category, name, max_score, transmutation_base, enabled, sort_order, linked_criteria_id
         FROM assessments
         WHERE term = ?
         ORDER BY sort_order, id",
    )?;

    let mut out = Vec::with_capacity(rows.len());
    for (term_raw, pt_weight, quiz_weight, exam_weight) in rows {
        let Some(term) = Term::parse(&term_raw) else {
            tracing::warn!(term = %term_raw, "skipping unknown term in term_configs");
            continue;
        };
        let assessments = assess_stmt
            .query_map([term.as_str()], |r| {
                let category_raw: String = r.get(1)?;
                Ok((
                    category_raw,
                    Assessment {
                        id: r.get(0)?,
                        name: r.get(2)?,
                        // Placeholder; replaced below once the category parses.
                        category: Category::Pt,
                        max_score: r.get(3)?,
                        transmutation_base: r.get(4)?,
                        enabled: r.get::<_, i64>(5)? != 0,
                        order: r.get(6)?,
                        linked_external_id: r.get(7)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(category_raw, mut a)| match Category::parse(&category_raw) {
                Some(c) => {
                    a.category = c;
                    Some(a)
                }
                None => {
                    tracing::warn!(assessment = %a.id, category = %category_raw, "skipping assessment with unknown category");
                    None
                }
            })
            .collect();
        out.push(TermConfig {
            term,
            pt_weight,
            quiz_weight,
            exam_weight,
            assessments,
        });
    }
    Ok(out)
}

/// Replaces a term's weights and its whole assessment list.
pub fn save_term_config(conn: &Connection, cfg: &TermConfig) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO term_configs(term, pt_weight, quiz_weight, exam_weight)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(term) DO UPDATE SET
           pt_weight = excluded.pt_weight,
           quiz_weight = excluded.quiz_weight,
           exam_weight = excluded.exam_weight",
        (
            cfg.term.as_str(),
            cfg.pt_weight,
            cfg.quiz_weight,
            cfg.exam_weight,
        ),
    )?;
    tx.execute("DELETE FROM assessments WHERE term = ?", [cfg.term.as_str()])?;
    for a in &cfg.assessments {
        tx.execute(
            "INSERT INTO assessments(
                id, term, category, name, max_score, transmutation_base,
                enabled, sort_order, linked_criteria_id
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                a.id,
                cfg.term.as_str(),
                a.category.as_str(),
                a.name,
                a.max_score,
                a.transmutation_base,
                a.enabled as i64,
                a.order,
                a.linked_external_id,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn load_scores(conn: &Connection) -> anyhow::Result<Vec<PendingWrite>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, assessment_id, score FROM scores ORDER BY student_id, assessment_id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(PendingWrite {
                student_id: r.get(0)?,
                assessment_id: r.get(1)?,
                score: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_criteria_results(conn: &Connection) -> anyhow::Result<Vec<(String, String, f64)>> {
    let mut stmt = conn.prepare("SELECT criteria_id, student_id, percent FROM criteria_results")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_criteria_result(
    conn: &Connection,
    criteria_id: &str,
    student_id: &str,
    percent: Option<f64>,
) -> anyhow::Result<()> {
    match percent {
        Some(p) => {
            conn.execute(
                "INSERT INTO criteria_results(criteria_id, student_id, percent, updated_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(criteria_id, student_id) DO UPDATE SET
                   percent = excluded.percent,
                   updated_at = excluded.updated_at",
                (criteria_id, student_id, p, chrono::Utc::now().to_rfc3339()),
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM criteria_results WHERE criteria_id = ? AND student_id = ?",
                (criteria_id, student_id),
            )?;
        }
    }
    Ok(())
}

/// Bulk upsert target backed by the workspace database. One transaction per
/// batch, so the batch lands whole or not at all.
pub struct SqliteScoreSink<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteScoreSink<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ScoreSink for SqliteScoreSink<'_> {
    fn bulk_upsert(&mut self, writes: &[PendingWrite]) -> Result<(), SinkError> {
        let tx = self.conn.unchecked_transaction()?;
        let updated_at = chrono::Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scores(id, student_id, assessment_id, score, updated_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, assessment_id) DO UPDATE SET
                   score = excluded.score,
                   updated_at = excluded.updated_at",
            )?;
            for w in writes {
                stmt.execute((
                    Uuid::new_v4().to_string(),
                    &w.student_id,
                    &w.assessment_id,
                    w.score,
                    &updated_at,
                ))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
