// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The ambient environment handed to task code.
//!
//! `TaskContext` is everything a task can touch: the host-tool seam, a log
//! shim, and a deterministic identifier source. No file, network, or
//! process access.

use serde_json::Value;
use uuid::Uuid;

use crate::model::{FrameOutcome, ReplayFrame, StepError, SuspensionDescriptor};

/// Unwinds task execution back to the sandbox boundary.
///
/// `Suspend` is the sentinel raised by [`TaskContext::call_host_tool`] when
/// the replay log is exhausted; task code must propagate it (usually with
/// `?`). `Fail` carries an error the task chose not to handle.
#[derive(Debug, Clone)]
pub enum TaskInterrupt {
    /// The task is waiting on this external call.
    Suspend(SuspensionDescriptor),
    /// The task failed.
    Fail(StepError),
}

impl TaskInterrupt {
    /// A task-code failure with the given message.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(StepError::task_code(message))
    }

    /// Is this the suspension sentinel?
    pub fn is_suspend(&self) -> bool {
        matches!(self, Self::Suspend(_))
    }
}

/// Execution context for one sandbox entry.
///
/// Holds the replay log: each `call_host_tool` consumes the next recorded
/// result instead of suspending, until the log is exhausted, after which
/// the next call suspends normally.
pub struct TaskContext {
    task_run_id: i64,
    frames: Vec<ReplayFrame>,
    cursor: usize,
    uuid_counter: u64,
}

impl TaskContext {
    /// Create a context over the recorded replay frames.
    pub fn new(task_run_id: i64, frames: Vec<ReplayFrame>) -> Self {
        Self {
            task_run_id,
            frames,
            cursor: 0,
            uuid_counter: 0,
        }
    }

    /// Invoke a named external endpoint.
    ///
    /// The sandbox does not perform the call: the request is recorded and a
    /// sentinel unwinds execution back to the sandbox boundary. On resume
    /// the recorded result is handed back here. A recorded failure surfaces
    /// as `TaskInterrupt::Fail`; handle it with a `match`, or let `?`
    /// propagate it and fail the task.
    pub fn call_host_tool(
        &mut self,
        service_name: &str,
        method_path: &str,
        args: Vec<Value>,
    ) -> Result<Value, TaskInterrupt> {
        if self.cursor < self.frames.len() {
            let frame = &self.frames[self.cursor];
            if frame.service_name != service_name || frame.method_name != method_path {
                return Err(TaskInterrupt::Fail(StepError::task_code(format!(
                    "replay mismatch: recorded call {}.{}, task code requested {}.{}; \
                     task code must be deterministic up to its external calls",
                    frame.service_name, frame.method_name, service_name, method_path
                ))));
            }
            self.cursor += 1;
            match &self.frames[self.cursor - 1].outcome {
                FrameOutcome::Ok { value } => Ok(value.clone()),
                FrameOutcome::Err { error } => Err(TaskInterrupt::Fail(error.clone())),
            }
        } else {
            Err(TaskInterrupt::Suspend(SuspensionDescriptor {
                service_name: service_name.to_string(),
                method_name: method_path.to_string(),
                args,
            }))
        }
    }

    /// Forward task output to the host log.
    pub fn log(&self, message: &str) {
        tracing::info!(task_run_id = self.task_run_id, "task: {}", message);
    }

    /// Identifier source, stable across replays: the n-th call returns the
    /// same UUID on every re-entry of the same task run.
    pub fn new_uuid(&mut self) -> Uuid {
        self.uuid_counter += 1;
        let seed = format!("filament:{}:{}", self.task_run_id, self.uuid_counter);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
    }

    /// The owning task run.
    pub fn task_run_id(&self) -> i64 {
        self.task_run_id
    }

    /// How many recorded frames have been consumed so far.
    pub fn replayed(&self) -> usize {
        self.cursor
    }
}
