// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Continuation capture: durably records a suspension.
//!
//! Ordering is load-bearing: the child stack run is inserted first, then
//! the parent's wait edge and replay log are written. A crash between the
//! two leaves an orphaned pending child, which the selection pass picks up
//! normally; a parent pointer to a nonexistent child is never written.

use tracing::debug;

use crate::error::CoreError;
use crate::model::{SuspensionDescriptor, VmState};
use crate::persistence::{NewStackRun, Persistence, StackRunRecord};

/// Persist a suspension: insert the awaited child, mark the parent waiting,
/// and mirror the wait onto the task run when the parent is the chain root.
///
/// Returns the new child stack run id.
pub async fn persist_suspension(
    store: &dyn Persistence,
    parent: &StackRunRecord,
    descriptor: &SuspensionDescriptor,
    vm_state: &VmState,
) -> Result<i64, CoreError> {
    let args = serde_json::to_string(&descriptor.args)?;

    let child_id = store
        .create_stack_run(&NewStackRun {
            parent_task_run_id: parent.parent_task_run_id,
            parent_stack_run_id: Some(parent.id),
            service_name: descriptor.service_name.clone(),
            method_name: descriptor.method_name.clone(),
            args,
        })
        .await?;

    let vm_json = vm_state.to_json()?;
    store.suspend_stack_run(parent.id, child_id, &vm_json).await?;

    if parent.is_root() {
        store
            .suspend_task_run(parent.parent_task_run_id, child_id)
            .await?;
    }

    debug!(
        parent_stack_run_id = parent.id,
        child_stack_run_id = child_id,
        service = %descriptor.service_name,
        method = %descriptor.method_name,
        "suspension captured"
    );

    Ok(child_id)
}
