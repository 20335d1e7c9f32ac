//! Durable run store.
//!
//! A full snapshot of the run state is written at every lifecycle
//! transition under the run id, which is what makes suspend/resume
//! survive a process restart: resuming reads the snapshot back and never
//! depends on anything held in memory.
//!
//! SQLite access is synchronous, so the connection lives behind a mutex
//! and every call runs on tokio's blocking thread pool.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::pipeline::state::RunState;

/// One row of the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub url: String,
    pub status: String,
    pub overall_score: Option<f64>,
    pub overall_passed: Option<bool>,
    pub created_at: String,
}

/// Async-safe handle to the run database. All access goes through
/// [`call`](RunStore::call) on the blocking pool.
#[derive(Clone)]
pub struct RunStore {
    inner: Arc<std::sync::Mutex<RunDb>>,
}

impl RunStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(std::sync::Mutex::new(RunDb::open(path)?)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(std::sync::Mutex::new(RunDb::in_memory()?)),
        })
    }

    async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&RunDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }

    /// Upsert the full snapshot for a run.
    pub async fn save(&self, state: &RunState) -> Result<()> {
        let state = state.clone();
        self.call(move |db| db.save(&state)).await
    }

    /// Load a run's snapshot; `None` when the id is unknown.
    pub async fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        let run_id = run_id.to_string();
        self.call(move |db| db.load(&run_id)).await
    }

    /// Write a resolved snapshot only if the stored run is still
    /// suspended. Returns false when the guard did not match, leaving the
    /// stored row untouched; concurrent resolutions race on this single
    /// conditional statement, so exactly one of them wins.
    pub async fn save_resolution(&self, state: &RunState) -> Result<bool> {
        let state = state.clone();
        self.call(move |db| db.save_resolution(&state)).await
    }

    /// Most-recent-first summaries.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        self.call(move |db| db.list_recent(limit)).await
    }
}

struct RunDb {
    conn: Connection,
}

impl RunDb {
    fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    url TEXT NOT NULL,
                    requested_by TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    status TEXT NOT NULL,
                    overall_score REAL,
                    overall_passed INTEGER,
                    snapshot TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at DESC);
                ",
            )
            .context("Failed to run migrations")?;
        Ok(())
    }

    fn save(&self, state: &RunState) -> Result<()> {
        let snapshot = serde_json::to_string(state).context("Failed to serialize run state")?;
        self.conn
            .execute(
                "INSERT INTO runs (run_id, url, requested_by, created_at, status,
                                   overall_score, overall_passed, snapshot, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
                 ON CONFLICT(run_id) DO UPDATE SET
                     status = excluded.status,
                     overall_score = excluded.overall_score,
                     overall_passed = excluded.overall_passed,
                     snapshot = excluded.snapshot,
                     updated_at = datetime('now')",
                params![
                    state.run_id,
                    state.url,
                    state.requested_by,
                    state.created_at,
                    state.status.as_str(),
                    state.overall_score,
                    state.overall_passed.map(|p| p as i64),
                    snapshot,
                ],
            )
            .context("Failed to save run")?;
        Ok(())
    }

    fn save_resolution(&self, state: &RunState) -> Result<bool> {
        let snapshot = serde_json::to_string(state).context("Failed to serialize run state")?;
        let affected = self
            .conn
            .execute(
                "UPDATE runs SET
                     status = ?2,
                     overall_score = ?3,
                     overall_passed = ?4,
                     snapshot = ?5,
                     updated_at = datetime('now')
                 WHERE run_id = ?1 AND status = 'awaiting_decision'",
                params![
                    state.run_id,
                    state.status.as_str(),
                    state.overall_score,
                    state.overall_passed.map(|p| p as i64),
                    snapshot,
                ],
            )
            .context("Failed to resolve run")?;
        Ok(affected > 0)
    }

    fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        let snapshot: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query run")?;

        snapshot
            .map(|json| {
                serde_json::from_str(&json).context("Failed to deserialize run snapshot")
            })
            .transpose()
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, url, status, overall_score, overall_passed, created_at
                 FROM runs ORDER BY created_at DESC LIMIT ?1",
            )
            .context("Failed to prepare listing query")?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunSummary {
                    run_id: row.get(0)?,
                    url: row.get(1)?,
                    status: row.get(2)?,
                    overall_score: row.get(3)?,
                    overall_passed: row.get::<_, Option<i64>>(4)?.map(|p| p != 0),
                    created_at: row.get(5)?,
                })
            })
            .context("Failed to list runs")?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row.context("Failed to read run row")?);
        }
        Ok(summaries)
    }
}
