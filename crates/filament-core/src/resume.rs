// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resumption path: wakes the exact awaiting parent after a child reaches a
//! terminal state.
//!
//! The wake is guarded: the parent must still be `suspended_waiting_child`
//! on exactly the finished child, and the guard transition is conditional
//! at the store level, so duplicate triggers and stale children are silent
//! no-ops. An unknown outcome leaves the parent unchanged.

use tracing::{debug, warn};

use crate::dispatch::DispatchOutcome;
use crate::error::CoreError;
use crate::model::{CODE_SERVICE, FrameOutcome, ReplayFrame, StackRunStatus};
use crate::persistence::StackRunRecord;
use crate::processor::StackProcessor;

impl StackProcessor {
    /// Wake `child`'s parent with the child's outcome, re-enter it, and
    /// interpret the re-entry exactly like a scheduled step. Recurses up
    /// the tree while parents keep completing.
    pub(crate) async fn resume_parent(
        &self,
        child: &StackRunRecord,
        outcome: FrameOutcome,
    ) -> Result<(), CoreError> {
        let Some(parent_id) = child.parent_stack_run_id else {
            return Ok(());
        };

        let Some(parent) = self.store().get_stack_run(parent_id).await? else {
            warn!(
                child_stack_run_id = child.id,
                parent_stack_run_id = parent_id,
                "finished child has a dangling parent pointer"
            );
            return Ok(());
        };

        if parent.status != StackRunStatus::SuspendedWaitingChild.as_str()
            || parent.waiting_on_stack_run_id != Some(child.id)
        {
            // Waiting for a different child, or already moved on. The
            // child's result stays on its record for inspection.
            debug!(
                child_stack_run_id = child.id,
                parent_stack_run_id = parent.id,
                parent_status = %parent.status,
                "parent is not awaiting this child, leaving it unchanged"
            );
            return Ok(());
        }

        let frame = ReplayFrame {
            service_name: child.service_name.clone(),
            method_name: child.method_name.clone(),
            outcome,
        };
        let payload = serde_json::to_string(&frame)?;

        if !self
            .store()
            .mark_stack_run_pending_resume(parent.id, child.id, &payload)
            .await?
        {
            // Duplicate resume or a concurrent worker got here first.
            debug!(parent_stack_run_id = parent.id, "resume already applied");
            return Ok(());
        }

        // Drive the parent immediately. A crash from here on is recovered
        // by selection: pending_resume steps are runnable.
        if !self.store().mark_stack_run_processing(parent.id).await? {
            return Ok(());
        }

        let Some(parent) = self.store().get_stack_run(parent.id).await? else {
            return Err(CoreError::StackRunNotFound {
                stack_run_id: parent.id,
            });
        };

        if parent.is_root() {
            self.store()
                .mark_task_run_running(parent.parent_task_run_id)
                .await?;
        }

        let outcome = if parent.service_name == CODE_SERVICE {
            self.dispatcher().dispatch(&parent).await
        } else {
            // An external step that suspended on nested processing: the
            // nested outcome is the step's outcome, no re-dispatch.
            match frame.outcome {
                FrameOutcome::Ok { value } => DispatchOutcome::Completed(value),
                FrameOutcome::Err { error } => DispatchOutcome::Failed(error),
            }
        };

        Box::pin(self.interpret_outcome(&parent, outcome)).await?;
        Ok(())
    }

    /// Apply an externally-delivered result to a stack run (the internal
    /// resume operation of the ingress surface). Terminal runs are left
    /// untouched, making duplicate deliveries harmless.
    pub async fn apply_external_result(
        &self,
        stack_run_id: i64,
        outcome: FrameOutcome,
    ) -> Result<(), CoreError> {
        let Some(run) = self.store().get_stack_run(stack_run_id).await? else {
            return Err(CoreError::StackRunNotFound { stack_run_id });
        };

        let status: StackRunStatus = run
            .status
            .parse()
            .map_err(|details| CoreError::storage("status", details))?;
        if status.is_terminal() {
            debug!(stack_run_id, "resume for an already-terminal step, ignoring");
            return Ok(());
        }

        let dispatch_outcome = match outcome {
            FrameOutcome::Ok { value } => DispatchOutcome::Completed(value),
            FrameOutcome::Err { error } => DispatchOutcome::Failed(error),
        };
        self.interpret_outcome(&run, dispatch_outcome).await?;
        Ok(())
    }
}
