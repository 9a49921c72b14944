// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The stack processor: selects the next ready step, enforces per-chain
//! mutual exclusion, drives the dispatcher, and propagates results.
//!
//! Selection honors FIFO within a chain (oldest runnable first by
//! `(created_at, id)`) with one override: the step a parent explicitly
//! awaits may jump ahead of unrelated older siblings. Chains progress
//! independently of each other.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dispatch::{DispatchOutcome, ServiceDispatcher};
use crate::error::CoreError;
use crate::model::{FrameOutcome, StackRunStatus};
use crate::persistence::{Persistence, StackRunRecord};
use crate::trigger::Trigger;

/// Processor tuning knobs.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Attempts to acquire a chain lock before deferring the candidate.
    pub lock_retry_attempts: u32,
    /// Base delay between lock attempts; backoff is linear (delay x attempt).
    pub lock_retry_delay: Duration,
    /// How many runnable steps one selection pass scans.
    pub selection_batch: i64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            lock_retry_attempts: 3,
            lock_retry_delay: Duration::from_millis(100),
            selection_batch: 50,
        }
    }
}

/// What one processing round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessReport {
    /// No ready candidate; nothing happened.
    Idle,
    /// One step was executed.
    Processed {
        /// The executed step.
        stack_run_id: i64,
        /// Whether the step reached completed/failed (false: it suspended).
        terminal: bool,
    },
}

/// Drives the system forward one step at a time.
pub struct StackProcessor {
    store: Arc<dyn Persistence>,
    dispatcher: Arc<ServiceDispatcher>,
    trigger: Arc<dyn Trigger>,
    owner_tag: String,
    config: ProcessorConfig,
}

impl StackProcessor {
    /// Create a processor with a fresh worker owner tag.
    pub fn new(
        store: Arc<dyn Persistence>,
        dispatcher: Arc<ServiceDispatcher>,
        trigger: Arc<dyn Trigger>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            trigger,
            owner_tag: Uuid::new_v4().to_string(),
            config,
        }
    }

    /// This worker's owner tag, recorded on every lock it takes.
    pub fn owner_tag(&self) -> &str {
        &self.owner_tag
    }

    pub(crate) fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    pub(crate) fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.dispatcher
    }

    pub(crate) fn trigger(&self) -> &Arc<dyn Trigger> {
        &self.trigger
    }

    /// Execute at most one ready step.
    ///
    /// Candidates are scanned oldest first; a candidate is skipped when an
    /// older sibling is still runnable (unless its parent awaits it), when
    /// its chain lock is contended, or when another worker claims it first.
    #[instrument(skip(self), fields(owner = %self.owner_tag))]
    pub async fn process_next(&self) -> Result<ProcessReport, CoreError> {
        let candidates = self
            .store
            .list_runnable_stack_runs(self.config.selection_batch)
            .await?;

        for run in candidates {
            let parent = match run.parent_stack_run_id {
                Some(parent_id) => self.store.get_stack_run(parent_id).await?,
                None => None,
            };

            if !self.is_ready(&run, parent.as_ref()).await? {
                continue;
            }

            let bypass = lock_bypassed(parent.as_ref());
            let mut acquired = false;
            if !bypass {
                acquired = self.acquire_lock_with_retry(run.parent_task_run_id).await?;
                if !acquired {
                    debug!(
                        stack_run_id = run.id,
                        chain = run.parent_task_run_id,
                        "chain lock contended, deferring candidate"
                    );
                    continue;
                }
            }

            if !self.store.mark_stack_run_processing(run.id).await? {
                // Another worker claimed it between selection and here.
                if acquired {
                    self.store.release_task_lock(run.parent_task_run_id).await?;
                }
                continue;
            }

            if run.is_root() {
                self.store
                    .mark_task_run_running(run.parent_task_run_id)
                    .await?;
            }

            info!(
                stack_run_id = run.id,
                chain = run.parent_task_run_id,
                service = %run.service_name,
                method = %run.method_name,
                bypass,
                "processing step"
            );

            let outcome = self.dispatcher.dispatch(&run).await;
            let terminal = self.interpret_outcome(&run, outcome).await?;

            if acquired && terminal {
                self.store.release_task_lock(run.parent_task_run_id).await?;
            }

            return Ok(ProcessReport::Processed {
                stack_run_id: run.id,
                terminal,
            });
        }

        Ok(ProcessReport::Idle)
    }

    /// FIFO within the chain, overridden when the parent awaits exactly
    /// this step.
    async fn is_ready(
        &self,
        run: &StackRunRecord,
        parent: Option<&StackRunRecord>,
    ) -> Result<bool, CoreError> {
        if let Some(parent) = parent
            && parent.waiting_on_stack_run_id == Some(run.id)
        {
            return Ok(true);
        }
        let blocked = self
            .store
            .has_older_runnable_sibling(run.parent_task_run_id, run.created_at, run.id)
            .await?;
        Ok(!blocked)
    }

    async fn acquire_lock_with_retry(&self, chain: i64) -> Result<bool, CoreError> {
        let attempts = self.config.lock_retry_attempts.max(1);
        for attempt in 1..=attempts {
            if self
                .store
                .try_acquire_task_lock(chain, &self.owner_tag)
                .await?
            {
                return Ok(true);
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.lock_retry_delay * attempt).await;
            }
        }
        Ok(false)
    }

    /// Write the step's end state and propagate it. Returns whether the
    /// step reached a terminal state.
    ///
    /// Terminal transitions fire the cascade trigger; a root step's
    /// terminal state is copied onto its task run and drops the chain lock
    /// (which may have been taken by whichever worker first ran the root).
    pub(crate) async fn interpret_outcome(
        &self,
        run: &StackRunRecord,
        outcome: DispatchOutcome,
    ) -> Result<bool, CoreError> {
        match outcome {
            DispatchOutcome::Completed(value) => {
                let raw = serde_json::to_string(&value)?;
                self.store.complete_stack_run(run.id, &raw).await?;
                info!(stack_run_id = run.id, "step completed");

                if run.is_root() {
                    self.store
                        .complete_task_run(run.parent_task_run_id, &raw)
                        .await?;
                    self.store.release_task_lock(run.parent_task_run_id).await?;
                } else {
                    self.resume_parent(run, FrameOutcome::Ok { value }).await?;
                }
                self.trigger.fire();
                Ok(true)
            }
            DispatchOutcome::Failed(error) => {
                let error = if error.stack_run_id.is_none() {
                    error.with_stack_run(run.id)
                } else {
                    error
                };
                let raw = error.to_json();
                self.store.fail_stack_run(run.id, &raw).await?;
                warn!(stack_run_id = run.id, kind = ?error.kind, "step failed: {}", error.message);

                if run.is_root() {
                    self.store.fail_task_run(run.parent_task_run_id, &raw).await?;
                    self.store.release_task_lock(run.parent_task_run_id).await?;
                } else {
                    self.resume_parent(run, FrameOutcome::Err { error }).await?;
                }
                self.trigger.fire();
                Ok(true)
            }
            DispatchOutcome::ChildSuspended(child_id) => {
                debug!(
                    stack_run_id = run.id,
                    child_stack_run_id = child_id,
                    "step suspended on child"
                );
                Ok(false)
            }
        }
    }
}

/// The bypass rule: a child of a suspended (or already completed) parent
/// runs under the parent's implicit chain ownership. Without it the child
/// of a suspended parent could never run and the chain would deadlock.
fn lock_bypassed(parent: Option<&StackRunRecord>) -> bool {
    match parent {
        Some(parent) => {
            parent.status == StackRunStatus::SuspendedWaitingChild.as_str()
                || parent.status == StackRunStatus::Completed.as_str()
        }
        None => false,
    }
}
