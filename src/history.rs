use chrono::{DateTime, Local};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::app_dirs;
use crate::error::{Result, TaisoError};
use crate::score::ScoreReport;

/// Per-user exercise score history, one row per (session, exercise).
#[derive(Debug)]
pub struct HistoryDb {
    conn: Connection,
}

/// One exercise's score compared against the previous session and the
/// personal best.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub exercise: String,
    pub curr: f64,
    pub prev: Option<f64>,
    pub diff_prev: Option<f64>,
    pub best: Option<f64>,
    pub diff_best: Option<f64>,
}

impl HistoryDb {
    /// Open the history database in the state directory, creating it and
    /// its parent directory if needed.
    pub fn new() -> Result<Self> {
        let db_path = app_dirs::db_path().unwrap_or_else(|| PathBuf::from("taiso_history.db"));
        Self::open(&db_path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TaisoError::DataFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(HistoryDb { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(HistoryDb { conn })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                exercise TEXT NOT NULL,
                mean_score REAL NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id)",
            [],
        )?;
        Ok(())
    }

    /// Record every exercise score of a graded session in one transaction.
    pub fn record_session(
        &mut self,
        user_id: &str,
        session_id: &str,
        timestamp: DateTime<Local>,
        report: &ScoreReport,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for exercise in &report.exercises {
            tx.execute(
                r#"
                INSERT INTO history (user_id, session_id, timestamp, exercise, mean_score)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    user_id,
                    session_id,
                    timestamp.to_rfc3339(),
                    exercise.exercise,
                    exercise.mean_score,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// A user's session ids in insertion order.
    pub fn session_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id FROM history
            WHERE user_id = ?1
            GROUP BY session_id
            ORDER BY MIN(id)
            "#,
        )?;
        let rows = stmt.query_map([user_id], |row| row.get(0))?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    /// Exercise scores of one session, in recorded order.
    pub fn session_scores(&self, user_id: &str, session_id: &str) -> Result<Vec<(String, f64)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT exercise, mean_score FROM history
            WHERE user_id = ?1 AND session_id = ?2
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, session_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

        let mut scores = Vec::new();
        for row in rows {
            scores.push(row?);
        }
        Ok(scores)
    }

    /// Best score ever recorded per exercise.
    pub fn personal_best(&self, user_id: &str) -> Result<HashMap<String, f64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT exercise, MAX(mean_score) FROM history
            WHERE user_id = ?1
            GROUP BY exercise
            "#,
        )?;
        let rows = stmt.query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut best = HashMap::new();
        for row in rows {
            let (exercise, score): (String, f64) = row?;
            best.insert(exercise, score);
        }
        Ok(best)
    }

    /// Mean session score per session in insertion order, at most the last
    /// `limit`. Feeds the history chart.
    pub fn recent_overall(&self, user_id: &str, limit: usize) -> Result<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT AVG(mean_score) FROM history
            WHERE user_id = ?1
            GROUP BY session_id
            ORDER BY MIN(id)
            "#,
        )?;
        let rows = stmt.query_map([user_id], |row| row.get(0))?;

        let mut means: Vec<f64> = Vec::new();
        for mean in rows {
            means.push(mean?);
        }
        let skip = means.len().saturating_sub(limit);
        Ok(means.split_off(skip))
    }

    /// Per-exercise comparison of a recorded session against the session
    /// before it and the per-exercise personal best. Empty when the session
    /// is unknown or is the user's first.
    pub fn comparison(&self, user_id: &str, session_id: &str) -> Result<Vec<ComparisonRow>> {
        let sids = self.session_ids(user_id)?;
        let Some(idx) = sids.iter().position(|s| s == session_id) else {
            return Ok(Vec::new());
        };
        if idx == 0 {
            return Ok(Vec::new());
        }

        let prev: HashMap<String, f64> = self
            .session_scores(user_id, &sids[idx - 1])?
            .into_iter()
            .collect();
        let best = self.personal_best(user_id)?;

        let rows = self
            .session_scores(user_id, session_id)?
            .into_iter()
            .map(|(exercise, curr)| {
                let prev_score = prev.get(&exercise).copied();
                let best_score = best.get(&exercise).copied();
                ComparisonRow {
                    curr,
                    prev: prev_score,
                    diff_prev: prev_score.map(|p| curr - p),
                    best: best_score,
                    diff_best: best_score.map(|b| curr - b),
                    exercise,
                }
            })
            .collect();
        Ok(rows)
    }
}

/// Append one summary line per session to a CSV log, writing the header
/// when the file is created.
pub fn append_session_log(
    path: &Path,
    user_id: &str,
    session_id: &str,
    timestamp: DateTime<Local>,
    overall: f64,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    let fresh = !path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if fresh {
        writer.write_record(["timestamp", "user_id", "session_id", "overall"])?;
    }
    writer.write_record([
        timestamp.to_rfc3339().as_str(),
        user_id,
        session_id,
        &format!("{overall:.2}"),
    ])?;
    writer.flush().map_err(TaisoError::Feed)?;
    Ok(())
}
