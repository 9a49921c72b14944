//! SQLite-backed persistence implementation.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::CoreError;

use super::{NewStackRun, Persistence, StackRunRecord, TaskLockRecord, TaskRunRecord};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects with WAL journaling and a busy timeout
    /// - Runs all migrations
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::StorageError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| CoreError::StorageError {
                operation: "connect".to_string(),
                details: format!("Invalid SQLite URL {:?}: {}", url, e),
            })?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::StorageError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::StorageError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const TASK_RUN_COLUMNS: &str = "id, task_name, input, status, result, error, \
     waiting_on_stack_run_id, created_at, updated_at, started_at, ended_at, suspended_at";

const STACK_RUN_COLUMNS: &str = "id, parent_task_run_id, parent_stack_run_id, service_name, \
     method_name, args, status, result, error, vm_state, waiting_on_stack_run_id, \
     resume_payload, created_at, updated_at";

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn create_task_run(&self, task_name: &str, input: &str) -> Result<i64, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO task_runs (task_name, input, status, created_at, updated_at)
            VALUES (?, ?, 'queued', ?, ?)
            "#,
        )
        .bind(task_name)
        .bind(input)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_task_run(&self, id: i64) -> Result<Option<TaskRunRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskRunRecord>(&format!(
            "SELECT {} FROM task_runs WHERE id = ?",
            TASK_RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn mark_task_run_running(&self, id: i64) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE task_runs
            SET status = 'running',
                waiting_on_stack_run_id = NULL,
                started_at = COALESCE(started_at, ?1),
                updated_at = ?1
            WHERE id = ?2
              AND status IN ('queued', 'running', 'suspended')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_task_run(&self, id: i64, result: &str) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE task_runs
            SET status = 'completed',
                result = ?1,
                waiting_on_stack_run_id = NULL,
                ended_at = ?2,
                updated_at = ?2
            WHERE id = ?3
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(result)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_task_run(&self, id: i64, error: &str) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE task_runs
            SET status = 'failed',
                error = ?1,
                waiting_on_stack_run_id = NULL,
                ended_at = ?2,
                updated_at = ?2
            WHERE id = ?3
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn suspend_task_run(&self, id: i64, waiting_on: i64) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE task_runs
            SET status = 'suspended',
                waiting_on_stack_run_id = ?1,
                suspended_at = ?2,
                updated_at = ?2
            WHERE id = ?3
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(waiting_on)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_active_task_runs(&self) -> Result<i64, CoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM task_runs WHERE status IN ('queued', 'running', 'suspended')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn create_stack_run(&self, new: &NewStackRun) -> Result<i64, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO stack_runs
                (parent_task_run_id, parent_stack_run_id, service_name, method_name,
                 args, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(new.parent_task_run_id)
        .bind(new.parent_stack_run_id)
        .bind(&new.service_name)
        .bind(&new.method_name)
        .bind(&new.args)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_stack_run(&self, id: i64) -> Result<Option<StackRunRecord>, CoreError> {
        let record = sqlx::query_as::<_, StackRunRecord>(&format!(
            "SELECT {} FROM stack_runs WHERE id = ?",
            STACK_RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_runnable_stack_runs(
        &self,
        limit: i64,
    ) -> Result<Vec<StackRunRecord>, CoreError> {
        let records = sqlx::query_as::<_, StackRunRecord>(&format!(
            r#"
            SELECT {}
            FROM stack_runs
            WHERE status IN ('pending', 'pending_resume')
            ORDER BY created_at, id
            LIMIT ?
            "#,
            STACK_RUN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn has_older_runnable_sibling(
        &self,
        parent_task_run_id: i64,
        created_at: DateTime<Utc>,
        id: i64,
    ) -> Result<bool, CoreError> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM stack_runs
                WHERE parent_task_run_id = ?1
                  AND status IN ('pending', 'pending_resume')
                  AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
            )
            "#,
        )
        .bind(parent_task_run_id)
        .bind(created_at)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    async fn mark_stack_run_processing(&self, id: i64) -> Result<bool, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'processing', updated_at = ?1
            WHERE id = ?2
              AND status IN ('pending', 'pending_resume')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_stack_run(&self, id: i64, result: &str) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'completed',
                result = ?1,
                waiting_on_stack_run_id = NULL,
                updated_at = ?2
            WHERE id = ?3
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(result)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_stack_run(&self, id: i64, error: &str) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'failed',
                error = ?1,
                waiting_on_stack_run_id = NULL,
                updated_at = ?2
            WHERE id = ?3
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn suspend_stack_run(
        &self,
        id: i64,
        waiting_on: i64,
        vm_state: &str,
    ) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'suspended_waiting_child',
                waiting_on_stack_run_id = ?1,
                vm_state = ?2,
                updated_at = ?3
            WHERE id = ?4
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(waiting_on)
        .bind(vm_state)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_stack_run_pending_resume(
        &self,
        id: i64,
        expected_child: i64,
        resume_payload: &str,
    ) -> Result<bool, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'pending_resume',
                resume_payload = ?1,
                result = NULL,
                updated_at = ?2
            WHERE id = ?3
              AND status = 'suspended_waiting_child'
              AND waiting_on_stack_run_id = ?4
            "#,
        )
        .bind(resume_payload)
        .bind(now)
        .bind(id)
        .bind(expected_child)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_chain_stack_runs(
        &self,
        parent_task_run_id: i64,
    ) -> Result<Vec<StackRunRecord>, CoreError> {
        let records = sqlx::query_as::<_, StackRunRecord>(&format!(
            r#"
            SELECT {}
            FROM stack_runs
            WHERE parent_task_run_id = ?
            ORDER BY created_at, id
            "#,
            STACK_RUN_COLUMNS
        ))
        .bind(parent_task_run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_stuck_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StackRunRecord>, CoreError> {
        let records = sqlx::query_as::<_, StackRunRecord>(&format!(
            r#"
            SELECT {}
            FROM stack_runs
            WHERE status = 'processing'
              AND updated_at < ?
            ORDER BY created_at, id
            "#,
            STACK_RUN_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn try_acquire_task_lock(
        &self,
        task_run_id: i64,
        owner: &str,
    ) -> Result<bool, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO task_locks (task_run_id, locked_at, locked_by) VALUES (?, ?, ?)",
        )
        .bind(task_run_id)
        .bind(now)
        .bind(owner)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_task_lock(&self, task_run_id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM task_locks WHERE task_run_id = ?")
            .bind(task_run_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_stale_task_locks(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM task_locks WHERE locked_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn get_task_lock(
        &self,
        task_run_id: i64,
    ) -> Result<Option<TaskLockRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskLockRecord>(
            "SELECT task_run_id, locked_at, locked_by FROM task_locks WHERE task_run_id = ?",
        )
        .bind(task_run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
