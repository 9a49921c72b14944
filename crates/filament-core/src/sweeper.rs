// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lock and recovery sweeper.
//!
//! Runs a cheap pass on every external trigger (no timers): reclaims chain
//! locks past the stale threshold and fails steps stuck in `processing`
//! past theirs. This is the sole mechanism by which crashed workers are
//! recovered; there is no heartbeat.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::StepError;
use crate::persistence::{Persistence, StackRunRecord};

/// Sweeper thresholds.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Locks older than this are reclaimed.
    pub lock_stale_after: Duration,
    /// Steps in `processing` longer than this are failed with a synthetic
    /// timeout error.
    pub step_stale_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            lock_stale_after: Duration::from_secs(300),
            step_stale_after: Duration::from_secs(120),
        }
    }
}

/// What one sweep pass reclaimed.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Stale locks removed.
    pub stale_locks_removed: u64,
    /// Steps that were failed with a timeout, as read before the
    /// transition. Non-root entries still need their parents woken with
    /// the failure; the engine does that with the processor's resume path.
    pub timed_out_steps: Vec<(StackRunRecord, StepError)>,
}

/// Stale-state reclamation over the durable store.
pub struct Sweeper {
    store: Arc<dyn Persistence>,
    config: SweeperConfig,
}

impl Sweeper {
    /// Create a sweeper with the given thresholds.
    pub fn new(store: Arc<dyn Persistence>, config: SweeperConfig) -> Self {
        Self { store, config }
    }

    /// One pass: delete stale locks, fail stuck steps.
    pub async fn sweep(&self) -> Result<SweepReport, CoreError> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let lock_cutoff = now
            - chrono::Duration::from_std(self.config.lock_stale_after)
                .map_err(|e| CoreError::storage("sweep", e))?;
        report.stale_locks_removed = self.store.delete_stale_task_locks(lock_cutoff).await?;
        if report.stale_locks_removed > 0 {
            info!(
                removed = report.stale_locks_removed,
                "reclaimed stale chain locks"
            );
        }

        let step_cutoff = now
            - chrono::Duration::from_std(self.config.step_stale_after)
                .map_err(|e| CoreError::storage("sweep", e))?;
        let stuck = self.store.list_stuck_processing(step_cutoff).await?;
        if stuck.is_empty() {
            debug!("no stuck steps found");
            return Ok(report);
        }

        info!(count = stuck.len(), "failing steps stuck in processing");
        for run in stuck {
            let error = StepError::timeout(format!(
                "step stuck in processing since {} (threshold: {}s)",
                run.updated_at.to_rfc3339(),
                self.config.step_stale_after.as_secs()
            ))
            .with_stack_run(run.id);

            if let Err(e) = self.fail_stuck_step(&run, &error).await {
                warn!(stack_run_id = run.id, error = %e, "failed to reclaim stuck step");
                continue;
            }
            report.timed_out_steps.push((run, error));
        }

        Ok(report)
    }

    /// Fail the step, drop its chain lock, and fail the task run when the
    /// stuck step was the chain root.
    async fn fail_stuck_step(
        &self,
        run: &StackRunRecord,
        error: &StepError,
    ) -> Result<(), CoreError> {
        let raw = error.to_json();
        self.store.fail_stack_run(run.id, &raw).await?;
        self.store.release_task_lock(run.parent_task_run_id).await?;
        if run.is_root() {
            self.store.fail_task_run(run.parent_task_run_id, &raw).await?;
        }

        warn!(
            stack_run_id = run.id,
            chain = run.parent_task_run_id,
            stuck_since = %run.updated_at,
            "stuck step failed and chain lock released"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SweeperConfig::default();
        assert_eq!(config.lock_stale_after, Duration::from_secs(300));
        assert_eq!(config.step_stale_after, Duration::from_secs(120));
    }
}
