// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::CoreError;

use super::{NewStackRun, Persistence, StackRunRecord, TaskLockRecord, TaskRunRecord};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

/// PostgreSQL-backed persistence provider.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres persistence provider from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL, sizing the pool, and run
    /// migrations.
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await
            .map_err(|e| CoreError::StorageError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to PostgreSQL: {}", e),
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
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const TASK_RUN_COLUMNS: &str = "id, task_name, input, status, result, error, \
     waiting_on_stack_run_id, created_at, updated_at, started_at, ended_at, suspended_at";

const STACK_RUN_COLUMNS: &str = "id, parent_task_run_id, parent_stack_run_id, service_name, \
     method_name, args, status, result, error, vm_state, waiting_on_stack_run_id, \
     resume_payload, created_at, updated_at";

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn create_task_run(&self, task_name: &str, input: &str) -> Result<i64, CoreError> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO task_runs (task_name, input, status, created_at, updated_at)
            VALUES ($1, $2, 'queued', $3, $3)
            RETURNING id
            "#,
        )
        .bind(task_name)
        .bind(input)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_task_run(&self, id: i64) -> Result<Option<TaskRunRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskRunRecord>(&format!(
            "SELECT {} FROM task_runs WHERE id = $1",
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
                started_at = COALESCE(started_at, $1),
                updated_at = $1
            WHERE id = $2
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
                result = $1,
                waiting_on_stack_run_id = NULL,
                ended_at = $2,
                updated_at = $2
            WHERE id = $3
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
                error = $1,
                waiting_on_stack_run_id = NULL,
                ended_at = $2,
                updated_at = $2
            WHERE id = $3
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
                waiting_on_stack_run_id = $1,
                suspended_at = $2,
                updated_at = $2
            WHERE id = $3
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
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO stack_runs
                (parent_task_run_id, parent_stack_run_id, service_name, method_name,
                 args, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6)
            RETURNING id
            "#,
        )
        .bind(new.parent_task_run_id)
        .bind(new.parent_stack_run_id)
        .bind(&new.service_name)
        .bind(&new.method_name)
        .bind(&new.args)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_stack_run(&self, id: i64) -> Result<Option<StackRunRecord>, CoreError> {
        let record = sqlx::query_as::<_, StackRunRecord>(&format!(
            "SELECT {} FROM stack_runs WHERE id = $1",
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
            LIMIT $1
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
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM stack_runs
                WHERE parent_task_run_id = $1
                  AND status IN ('pending', 'pending_resume')
                  AND (created_at < $2 OR (created_at = $2 AND id < $3))
            )
            "#,
        )
        .bind(parent_task_run_id)
        .bind(created_at)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_stack_run_processing(&self, id: i64) -> Result<bool, CoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'processing', updated_at = $1
            WHERE id = $2
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
                result = $1,
                waiting_on_stack_run_id = NULL,
                updated_at = $2
            WHERE id = $3
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
                error = $1,
                waiting_on_stack_run_id = NULL,
                updated_at = $2
            WHERE id = $3
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
                waiting_on_stack_run_id = $1,
                vm_state = $2,
                updated_at = $3
            WHERE id = $4
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
                resume_payload = $1,
                result = NULL,
                updated_at = $2
            WHERE id = $3
              AND status = 'suspended_waiting_child'
              AND waiting_on_stack_run_id = $4
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
            WHERE parent_task_run_id = $1
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
              AND updated_at < $1
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
            "INSERT INTO task_locks (task_run_id, locked_at, locked_by) VALUES ($1, $2, $3)",
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
        sqlx::query("DELETE FROM task_locks WHERE task_run_id = $1")
            .bind(task_run_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_stale_task_locks(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM task_locks WHERE locked_at < $1")
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
            "SELECT task_run_id, locked_at, locked_by FROM task_locks WHERE task_run_id = $1",
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
