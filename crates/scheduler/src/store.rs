//! Persistent scheduler state.
//!
//! Owns the three tables behind cluster coordination: `scheduler_locks`
//! (the per-task lease), `scheduler_executions` (append-only run history),
//! and `scheduler_state` (shared last/next-run for catch-up). All writes
//! are single statements; lease acquisition relies on `INSERT OR IGNORE`
//! plus a post-condition read instead of multi-statement transactions.
//! Timestamps are stored as UTC.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ms_domain::{Error, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub const EXEC_RUNNING: &str = "running";
pub const EXEC_COMPLETED: &str = "completed";
pub const EXEC_FAILED: &str = "failed";

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskLockRow {
    pub task_name: String,
    pub node_id: String,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskExecutionRow {
    pub id: i64,
    pub task_name: String,
    pub node_id: String,
    pub hostname: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskStateRow {
    pub task_name: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_node_id: String,
    pub last_hostname: String,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SQL-backed scheduler state. Node identity is passed per call so several
/// logical nodes can share one store handle (which the lease tests rely
/// on).
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Attach to a pool and create the schema when missing.
    pub async fn connect(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS scheduler_locks (
                task_name TEXT PRIMARY KEY,
                node_id TEXT NOT NULL,
                hostname TEXT NOT NULL,
                acquired_at TIMESTAMP NOT NULL,
                expires_at TIMESTAMP NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS scheduler_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                node_id TEXT NOT NULL,
                hostname TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                error TEXT,
                scheduled_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_scheduler_executions_task
                ON scheduler_executions (task_name, started_at DESC)",
            "CREATE TABLE IF NOT EXISTS scheduler_state (
                task_name TEXT PRIMARY KEY,
                last_run TIMESTAMP,
                next_run TIMESTAMP,
                last_node_id TEXT NOT NULL,
                last_hostname TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    // ── Lease ──────────────────────────────────────────────────────

    /// Try to take (or refresh) the lease on `task_name` for `node_id`.
    ///
    /// Expired rows are purged first; then an `INSERT OR IGNORE` races for
    /// the primary key and the surviving row decides ownership. A row held
    /// by this node has its expiry extended.
    pub async fn acquire_lease(
        &self,
        task_name: &str,
        node_id: &str,
        hostname: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(300));

        sqlx::query("DELETE FROM scheduler_locks WHERE task_name = ? AND expires_at < ?")
            .bind(task_name)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "INSERT OR IGNORE INTO scheduler_locks
                (task_name, node_id, hostname, acquired_at, expires_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(task_name)
        .bind(node_id)
        .bind(hostname)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let holder: Option<String> =
            sqlx::query("SELECT node_id FROM scheduler_locks WHERE task_name = ?")
                .bind(task_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .map(|row| row.get("node_id"));

        match holder.as_deref() {
            Some(holder) if holder == node_id => {
                sqlx::query(
                    "UPDATE scheduler_locks SET expires_at = ? WHERE task_name = ? AND node_id = ?",
                )
                .bind(expires_at)
                .bind(task_name)
                .bind(node_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop this node's lease. Safe to call when not held.
    pub async fn release_lease(&self, task_name: &str, node_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scheduler_locks WHERE task_name = ? AND node_id = ?")
            .bind(task_name)
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// The current non-expired lock row, when one exists.
    pub async fn active_lock(&self, task_name: &str) -> Result<Option<TaskLockRow>> {
        sqlx::query_as::<_, TaskLockRow>(
            "SELECT * FROM scheduler_locks WHERE task_name = ? AND expires_at >= ?",
        )
        .bind(task_name)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    // ── Execution history ──────────────────────────────────────────

    /// Append a `running` execution row; returns its id.
    pub async fn record_start(
        &self,
        task_name: &str,
        node_id: &str,
        hostname: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO scheduler_executions
                (task_name, node_id, hostname, status, started_at, scheduled_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_name)
        .bind(node_id)
        .bind(hostname)
        .bind(EXEC_RUNNING)
        .bind(now)
        .bind(scheduled_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.last_insert_rowid())
    }

    /// Close an execution row as completed or failed.
    pub async fn record_completion(
        &self,
        execution_id: i64,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scheduler_executions
                SET status = ?, completed_at = ?, error = ?
              WHERE id = ?",
        )
        .bind(if success { EXEC_COMPLETED } else { EXEC_FAILED })
        .bind(Utc::now())
        .bind(error)
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent executions for a task, newest first.
    pub async fn execution_history(
        &self,
        task_name: &str,
        limit: u32,
    ) -> Result<Vec<TaskExecutionRow>> {
        sqlx::query_as::<_, TaskExecutionRow>(
            "SELECT * FROM scheduler_executions
              WHERE task_name = ?
              ORDER BY started_at DESC, id DESC
              LIMIT ?",
        )
        .bind(task_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Delete executions that started before `now - retention`. Returns the
    /// number of rows removed.
    pub async fn cleanup_old_executions(&self, retention: Duration) -> Result<u64> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(30));
        let result = sqlx::query("DELETE FROM scheduler_executions WHERE started_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    // ── Shared state ───────────────────────────────────────────────

    /// Record a completed trigger for cross-node catch-up.
    pub async fn upsert_state(
        &self,
        task_name: &str,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
        node_id: &str,
        hostname: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO scheduler_state
                (task_name, last_run, next_run, last_node_id, last_hostname, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(task_name) DO UPDATE SET
                last_run = excluded.last_run,
                next_run = excluded.next_run,
                last_node_id = excluded.last_node_id,
                last_hostname = excluded.last_hostname,
                updated_at = excluded.updated_at",
        )
        .bind(task_name)
        .bind(last_run)
        .bind(next_run)
        .bind(node_id)
        .bind(hostname)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Push a task's shared `next_run` forward without running it (used
    /// when a missed trigger falls outside the catch-up window).
    pub async fn advance_state(&self, task_name: &str, next_run: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE scheduler_state SET next_run = ?, updated_at = ? WHERE task_name = ?",
        )
        .bind(next_run)
        .bind(Utc::now())
        .bind(task_name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_state(&self, task_name: &str) -> Result<Option<TaskStateRow>> {
        sqlx::query_as::<_, TaskStateRow>("SELECT * FROM scheduler_state WHERE task_name = ?")
            .bind(task_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    /// States whose shared `next_run` is already in the past — missed-job
    /// candidates at startup.
    pub async fn overdue_states(&self, now: DateTime<Utc>) -> Result<Vec<TaskStateRow>> {
        sqlx::query_as::<_, TaskStateRow>("SELECT * FROM scheduler_state WHERE next_run < ?")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }
}
