//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::probe::{ProbeOutcome, ProbeState, Target};
use crate::scheduler::BatchRun;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const RUN_COLUMNS: &str = "r.id, r.started_at, r.completed_at, r.concurrency_limit, r.cancelled, r.total,
     COALESCE(SUM(CASE WHEN o.state = 'reachable' THEN 1 ELSE 0 END), 0),
     COUNT(o.run_id)";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Runs ---

    /// Save a finished run and all of its outcomes.
    pub fn save_run(&self, run: &BatchRun) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO runs (id, started_at, completed_at, concurrency_limit, cancelled, total) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.id,
                format_time(run.started_at),
                run.completed_at.map(format_time),
                run.concurrency_limit as i64,
                run.cancelled,
                run.targets.len() as i64,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO outcomes (run_id, label, url_index, url, state, elapsed_ms, observed_at, status_code, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            for o in &run.outcomes {
                stmt.execute(params![
                    run.id,
                    o.target.label,
                    o.target.index as i64,
                    o.target.url,
                    o.state.as_str(),
                    o.elapsed_ms as i64,
                    format_time(o.observed_at),
                    o.status_code,
                    o.error,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub fn get_recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs r LEFT JOIN outcomes o ON o.run_id = r.id
             GROUP BY r.id ORDER BY r.started_at DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(params![clamp_limit(limit)], run_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(runs)
    }

    /// Get a run by ID.
    pub fn get_run(&self, id: &str) -> Result<RunRecord, DbError> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                &format!(
                    "SELECT {} FROM runs r LEFT JOIN outcomes o ON o.run_id = r.id
                     WHERE r.id = ?1 GROUP BY r.id",
                    RUN_COLUMNS
                ),
                params![id],
                run_from_row,
            )
            .optional()?;

        run.ok_or(DbError::NotFound)
    }

    /// Outcomes of a run in the order they settled.
    pub fn get_run_outcomes(&self, run_id: &str) -> Result<Vec<ProbeOutcome>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT label, url_index, url, state, elapsed_ms, observed_at, status_code, error
             FROM outcomes WHERE run_id = ?1 ORDER BY rowid ASC",
        )?;

        let outcomes = stmt
            .query_map(params![run_id], |row| {
                let state: String = row.get(3)?;
                let observed_at: String = row.get(5)?;
                let index: i64 = row.get(1)?;
                let elapsed_ms: i64 = row.get(4)?;
                Ok(ProbeOutcome {
                    target: Target::with_index(row.get::<_, String>(0)?, index as usize, row.get::<_, String>(2)?),
                    state: state.parse().unwrap_or(ProbeState::Unreachable),
                    elapsed_ms: elapsed_ms as u64,
                    observed_at: parse_db_time(&observed_at).unwrap_or_else(Utc::now),
                    status_code: row.get(6)?,
                    error: row.get(7)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(outcomes)
    }

    /// Total number of stored runs.
    pub fn get_run_count(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Delete runs started before a cutoff time. Returns the number removed.
    pub fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let cutoff = format_time(cutoff);
        conn.execute(
            "DELETE FROM outcomes WHERE run_id IN (SELECT id FROM runs WHERE started_at < ?1)",
            params![cutoff],
        )?;
        let deleted = conn.execute("DELETE FROM runs WHERE started_at < ?1", params![cutoff])?;
        Ok(deleted)
    }

    /// Keep only the newest `max_runs` runs. Returns the number removed.
    pub fn keep_latest_runs(&self, max_runs: usize) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let stale = "SELECT id FROM runs ORDER BY started_at DESC LIMIT -1 OFFSET ?1";
        conn.execute(
            &format!("DELETE FROM outcomes WHERE run_id IN ({})", stale),
            params![clamp_limit(max_runs)],
        )?;
        let deleted = conn.execute(
            &format!("DELETE FROM runs WHERE id IN ({})", stale),
            params![clamp_limit(max_runs)],
        )?;
        Ok(deleted)
    }
}

fn run_from_row(row: &Row<'_>) -> SqlResult<RunRecord> {
    let started_at: String = row.get(1)?;
    let completed_at: Option<String> = row.get(2)?;
    let online: i64 = row.get(6)?;
    let settled: i64 = row.get(7)?;

    Ok(RunRecord {
        id: row.get(0)?,
        started_at: parse_db_time(&started_at).unwrap_or_else(Utc::now),
        completed_at: completed_at.as_deref().and_then(parse_db_time),
        concurrency_limit: row.get(3)?,
        cancelled: row.get(4)?,
        total: row.get(5)?,
        online,
        offline: settled - online,
    })
}

/// SQLite reads a negative LIMIT as unbounded, so never let a count wrap.
fn clamp_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
