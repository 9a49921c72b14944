//! Persistence interfaces and backends for filament-core.
//!
//! This module defines the durable store abstraction and backend
//! implementations. All updates are row-scoped by primary key; conditional
//! transitions report whether they applied so callers can detect races.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;

/// Task run record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRunRecord {
    /// Store-assigned row id; also the chain identifier of its stack runs.
    pub id: i64,
    /// Registered task name this run executes.
    pub task_name: String,
    /// Submission input, JSON text.
    pub input: String,
    /// Current status (queued, running, suspended, completed, failed).
    pub status: String,
    /// Final result, JSON text, set on completion.
    pub result: Option<String>,
    /// Structured error record, JSON text, set on failure.
    pub error: Option<String>,
    /// Stack run the root step is waiting on while suspended.
    pub waiting_on_stack_run_id: Option<i64>,
    /// When the run was submitted.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// When the root step first started processing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// When the run last suspended.
    pub suspended_at: Option<DateTime<Utc>>,
}

/// Stack run record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StackRunRecord {
    /// Store-assigned row id.
    pub id: i64,
    /// Chain identifier (the owning task run).
    pub parent_task_run_id: i64,
    /// Direct caller step; None for the root step of a chain.
    pub parent_stack_run_id: Option<i64>,
    /// Named endpoint, or "code" for sandbox steps.
    pub service_name: String,
    /// Method path, recorded verbatim.
    pub method_name: String,
    /// JSON argument vector.
    pub args: String,
    /// Current status (pending, processing, suspended_waiting_child,
    /// pending_resume, completed, failed).
    pub status: String,
    /// Result, JSON text, set on completion.
    pub result: Option<String>,
    /// Structured error record, JSON text, set on failure.
    pub error: Option<String>,
    /// Serialized replay log for code steps.
    pub vm_state: Option<String>,
    /// Child this step is waiting on while suspended.
    pub waiting_on_stack_run_id: Option<i64>,
    /// Awaited child's outcome, attached when the parent is woken.
    pub resume_payload: Option<String>,
    /// When the step was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; staleness baseline for the sweeper.
    pub updated_at: DateTime<Utc>,
}

impl StackRunRecord {
    /// Is this the root step of its chain?
    pub fn is_root(&self) -> bool {
        self.parent_stack_run_id.is_none()
    }
}

/// Per-chain lock row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskLockRecord {
    /// The locked chain.
    pub task_run_id: i64,
    /// When the lock was taken.
    pub locked_at: DateTime<Utc>,
    /// Owner tag of the worker holding it.
    pub locked_by: String,
}

/// Fields for inserting a new stack run.
#[derive(Debug, Clone)]
pub struct NewStackRun {
    /// Chain the step belongs to.
    pub parent_task_run_id: i64,
    /// Direct caller step; None for a chain's root step.
    pub parent_stack_run_id: Option<i64>,
    /// Named endpoint, or "code".
    pub service_name: String,
    /// Method path.
    pub method_name: String,
    /// JSON argument vector, serialized.
    pub args: String,
}

/// Durable store interface used by the processor, sweeper and ingress.
///
/// The contract is deliberately small: insert with unique-constraint
/// enforcement, update by primary key with simple WHERE predicates, ordered
/// select by `(created_at, id)`, delete. Single-row read-your-writes is
/// assumed.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Task runs
    // ------------------------------------------------------------------

    async fn create_task_run(&self, task_name: &str, input: &str) -> Result<i64, CoreError>;

    async fn get_task_run(&self, id: i64) -> Result<Option<TaskRunRecord>, CoreError>;

    /// Move a task run (back) into `running`, setting `started_at` on the
    /// first transition and clearing the waiting pointer.
    async fn mark_task_run_running(&self, id: i64) -> Result<(), CoreError>;

    /// Terminal success: sets result, `ended_at`, clears the waiting pointer.
    async fn complete_task_run(&self, id: i64, result: &str) -> Result<(), CoreError>;

    /// Terminal failure: sets the structured error and `ended_at`.
    async fn fail_task_run(&self, id: i64, error: &str) -> Result<(), CoreError>;

    /// Root step suspended: mirror the awaited child onto the task run.
    async fn suspend_task_run(&self, id: i64, waiting_on: i64) -> Result<(), CoreError>;

    async fn count_active_task_runs(&self) -> Result<i64, CoreError>;

    // ------------------------------------------------------------------
    // Stack runs
    // ------------------------------------------------------------------

    async fn create_stack_run(&self, new: &NewStackRun) -> Result<i64, CoreError>;

    async fn get_stack_run(&self, id: i64) -> Result<Option<StackRunRecord>, CoreError>;

    /// Runnable steps (`pending` or `pending_resume`), oldest first by
    /// `(created_at, id)`, up to `limit`.
    async fn list_runnable_stack_runs(&self, limit: i64)
    -> Result<Vec<StackRunRecord>, CoreError>;

    /// Does the chain hold a runnable step strictly older than the given one?
    async fn has_older_runnable_sibling(
        &self,
        parent_task_run_id: i64,
        created_at: DateTime<Utc>,
        id: i64,
    ) -> Result<bool, CoreError>;

    /// Conditional transition runnable -> `processing`. Returns false when
    /// another worker won the race.
    async fn mark_stack_run_processing(&self, id: i64) -> Result<bool, CoreError>;

    /// Terminal success for a step.
    async fn complete_stack_run(&self, id: i64, result: &str) -> Result<(), CoreError>;

    /// Terminal failure for a step.
    async fn fail_stack_run(&self, id: i64, error: &str) -> Result<(), CoreError>;

    /// Step suspends on a child: records the wait edge and the replay log.
    async fn suspend_stack_run(
        &self,
        id: i64,
        waiting_on: i64,
        vm_state: &str,
    ) -> Result<(), CoreError>;

    /// Guarded wake of a suspended parent: applies only while the parent is
    /// `suspended_waiting_child` on exactly `expected_child`. Returns false
    /// otherwise (duplicate or stale resume; harmless).
    async fn mark_stack_run_pending_resume(
        &self,
        id: i64,
        expected_child: i64,
        resume_payload: &str,
    ) -> Result<bool, CoreError>;

    /// All steps of a chain, oldest first. Diagnostics and the status
    /// surface.
    async fn list_chain_stack_runs(
        &self,
        parent_task_run_id: i64,
    ) -> Result<Vec<StackRunRecord>, CoreError>;

    /// Steps stuck in `processing` whose `updated_at` is older than the
    /// cutoff.
    async fn list_stuck_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StackRunRecord>, CoreError>;

    // ------------------------------------------------------------------
    // Task locks
    // ------------------------------------------------------------------

    /// Atomic lock insert keyed by chain. Returns false if the chain is
    /// already locked (contention, not an error).
    async fn try_acquire_task_lock(
        &self,
        task_run_id: i64,
        owner: &str,
    ) -> Result<bool, CoreError>;

    async fn release_task_lock(&self, task_run_id: i64) -> Result<(), CoreError>;

    /// Drop locks older than the cutoff; returns how many were removed.
    async fn delete_stale_task_locks(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError>;

    async fn get_task_lock(&self, task_run_id: i64)
    -> Result<Option<TaskLockRecord>, CoreError>;

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    async fn health_check_db(&self) -> Result<bool, CoreError>;
}
