//! DB Adapter (C9).
//!
//! Out of scope per spec: the suite database manager itself. This
//! module defines only the thin insert/update contract the core calls
//! into, as an object-safe `async_trait`, matching the host's
//! `AgentRepository` shape — plus one `SqliteDbAdapter` reference
//! implementation against a minimal two-table schema, enough to
//! exercise the three call shapes without reproducing a full suite
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::error::DbError;
use crate::domain::TaskId;

/// One row appended to the task-events log.
#[derive(Debug, Clone)]
pub struct TaskEventRow {
    pub time: DateTime<Utc>,
    pub event: String,
    pub message: Option<String>,
}

/// A sparse delta applied to a task's job row. `None` fields are left
/// untouched, matching the source's "only the given keys are updated"
/// semantics.
#[derive(Debug, Clone, Default)]
pub struct TaskJobDelta {
    pub run_status: Option<i32>,
    pub time_run: Option<DateTime<Utc>>,
    pub time_run_exit: Option<DateTime<Utc>>,
    pub time_submit_exit: Option<DateTime<Utc>>,
    pub submit_status: Option<i32>,
    pub batch_sys_job_id: Option<String>,
    pub run_signal: Option<String>,
}

/// Thin contract for recording events and job-state deltas; three call
/// shapes per §4.9.
#[async_trait]
pub trait DbAdapter: Send + Sync {
    async fn put_insert_task_events(&self, task: &TaskId, row: TaskEventRow) -> Result<(), DbError>;

    async fn put_update_task_jobs(&self, task: &TaskId, submit_num: u64, delta: TaskJobDelta)
        -> Result<(), DbError>;

    async fn put_update_task_outputs(&self, task: &TaskId, outputs_json: &str) -> Result<(), DbError>;
}

/// Reference `DbAdapter` backed by SQLite, against a minimal
/// `task_events`/`task_jobs` schema — not a full suite database.
pub struct SqliteDbAdapter {
    pool: SqlitePool,
}

impl SqliteDbAdapter {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the two tables this adapter needs if they don't already
    /// exist. Call once at startup.
    pub async fn migrate(&self) -> Result<(), DbError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                cycle_point TEXT NOT NULL,
                time TEXT NOT NULL,
                event TEXT NOT NULL,
                message TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS task_jobs (
                task_name TEXT NOT NULL,
                cycle_point TEXT NOT NULL,
                submit_num INTEGER NOT NULL,
                run_status INTEGER,
                time_run TEXT,
                time_run_exit TEXT,
                time_submit_exit TEXT,
                submit_status INTEGER,
                batch_sys_job_id TEXT,
                run_signal TEXT,
                outputs_json TEXT,
                PRIMARY KEY (task_name, cycle_point, submit_num)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DbAdapter for SqliteDbAdapter {
    async fn put_insert_task_events(&self, task: &TaskId, row: TaskEventRow) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO task_events (task_name, cycle_point, time, event, message)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&task.name)
        .bind(&task.cycle_point)
        .bind(row.time.to_rfc3339())
        .bind(&row.event)
        .bind(&row.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_update_task_jobs(
        &self,
        task: &TaskId,
        submit_num: u64,
        delta: TaskJobDelta,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO task_jobs
                (task_name, cycle_point, submit_num, run_status, time_run, time_run_exit,
                 time_submit_exit, submit_status, batch_sys_job_id, run_signal)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(task_name, cycle_point, submit_num) DO UPDATE SET
                run_status = COALESCE(excluded.run_status, run_status),
                time_run = COALESCE(excluded.time_run, time_run),
                time_run_exit = COALESCE(excluded.time_run_exit, time_run_exit),
                time_submit_exit = COALESCE(excluded.time_submit_exit, time_submit_exit),
                submit_status = COALESCE(excluded.submit_status, submit_status),
                batch_sys_job_id = COALESCE(excluded.batch_sys_job_id, batch_sys_job_id),
                run_signal = COALESCE(excluded.run_signal, run_signal)",
        )
        .bind(&task.name)
        .bind(&task.cycle_point)
        .bind(submit_num as i64)
        .bind(delta.run_status)
        .bind(delta.time_run.map(|t| t.to_rfc3339()))
        .bind(delta.time_run_exit.map(|t| t.to_rfc3339()))
        .bind(delta.time_submit_exit.map(|t| t.to_rfc3339()))
        .bind(delta.submit_status)
        .bind(&delta.batch_sys_job_id)
        .bind(&delta.run_signal)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_update_task_outputs(&self, task: &TaskId, outputs_json: &str) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE task_jobs SET outputs_json = ?
             WHERE task_name = ? AND cycle_point = ?
             AND submit_num = (SELECT MAX(submit_num) FROM task_jobs
                                WHERE task_name = ? AND cycle_point = ?)",
        )
        .bind(outputs_json)
        .bind(&task.name)
        .bind(&task.cycle_point)
        .bind(&task.name)
        .bind(&task.cycle_point)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
