// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task sandbox: executes task code with a restricted ambient environment.
//!
//! The sandbox produces one of three outcomes: a completed value, a failure,
//! or a suspension descriptor naming the external call that must happen
//! before the task can continue. It never performs external calls itself
//! and never retries; retry policy belongs to the stack processor.
//!
//! Continuation model: call-site continuation with replay. Each
//! `call_host_tool` past the end of the replay log unwinds execution via a
//! sentinel; on resume the task is re-executed from the top and the log
//! feeds back the prior results in order.

pub mod context;
pub mod registry;

pub use context::{TaskContext, TaskInterrupt};
pub use registry::{TaskFn, TaskRegistry};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::model::{ReplayFrame, StepError, SuspensionDescriptor, VmState};

/// Result of one sandbox entry.
#[derive(Debug)]
pub enum SandboxOutcome {
    /// Task code returned a value.
    Completed(Value),
    /// Task code is waiting on an external call; `vm_state` is the replay
    /// log to persist alongside the wait edge.
    Suspended {
        /// The awaited call.
        descriptor: SuspensionDescriptor,
        /// Replay log to persist on the suspending step.
        vm_state: VmState,
    },
    /// Task code failed (returned an error, replayed an unhandled failure,
    /// or panicked).
    Failed(StepError),
}

/// Executes registered task functions under replay semantics.
pub struct TaskSandbox {
    registry: Arc<TaskRegistry>,
}

impl TaskSandbox {
    /// Create a sandbox over the given registry.
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Is a task registered under this name?
    pub fn knows_task(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Run a task to its next suspension point (or completion).
    ///
    /// `vm_state` carries the replay log recorded at the last suspension;
    /// `resume` is the freshly-arrived child outcome, appended to the log
    /// before the task function is re-entered from the top.
    pub fn run(
        &self,
        task_name: &str,
        input: Value,
        task_run_id: i64,
        stack_run_id: i64,
        mut vm_state: VmState,
        resume: Option<ReplayFrame>,
    ) -> SandboxOutcome {
        let Some(task) = self.registry.get(task_name) else {
            return SandboxOutcome::Failed(
                StepError::task_code(format!("no task registered under '{}'", task_name))
                    .with_stack_run(stack_run_id),
            );
        };

        if let Some(frame) = resume {
            vm_state.frames.push(frame);
        }

        debug!(
            task_run_id,
            stack_run_id,
            task_name,
            replay_frames = vm_state.frames.len(),
            "entering sandbox"
        );

        let mut ctx = TaskContext::new(task_run_id, vm_state.frames.clone());
        let outcome = catch_unwind(AssertUnwindSafe(|| task(&mut ctx, input)));

        match outcome {
            Ok(Ok(value)) => SandboxOutcome::Completed(value),
            Ok(Err(TaskInterrupt::Suspend(descriptor))) => SandboxOutcome::Suspended {
                descriptor,
                vm_state,
            },
            Ok(Err(TaskInterrupt::Fail(error))) => {
                let error = if error.stack_run_id.is_none() {
                    error.with_stack_run(stack_run_id)
                } else {
                    error
                };
                SandboxOutcome::Failed(error)
            }
            Err(panic) => SandboxOutcome::Failed(
                StepError::task_code(format!("task panicked: {}", panic_message(panic.as_ref())))
                    .with_stack_run(stack_run_id),
            ),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FrameOutcome;
    use serde_json::json;

    fn sandbox_with(name: &str, task: impl Fn(&mut TaskContext, Value) -> Result<Value, TaskInterrupt> + Send + Sync + 'static) -> TaskSandbox {
        let mut registry = TaskRegistry::new();
        registry.register(name, task);
        TaskSandbox::new(Arc::new(registry))
    }

    fn ok_frame(service: &str, method: &str, value: Value) -> ReplayFrame {
        ReplayFrame {
            service_name: service.to_string(),
            method_name: method.to_string(),
            outcome: FrameOutcome::Ok { value },
        }
    }

    #[test]
    fn test_completes_without_external_calls() {
        let sandbox = sandbox_with("id", |_ctx, input| Ok(input));
        match sandbox.run("id", json!({"k": 1}), 1, 1, VmState::default(), None) {
            SandboxOutcome::Completed(v) => assert_eq!(v, json!({"k": 1})),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_task_fails() {
        let sandbox = TaskSandbox::new(Arc::new(TaskRegistry::new()));
        match sandbox.run("ghost", json!(null), 1, 9, VmState::default(), None) {
            SandboxOutcome::Failed(e) => {
                assert!(e.message.contains("ghost"));
                assert_eq!(e.stack_run_id, Some(9));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_suspends_on_first_external_call() {
        let sandbox = sandbox_with("caller", |ctx, _input| {
            let a = ctx.call_host_tool("x", "f", vec![json!(1)])?;
            Ok(json!([a]))
        });
        match sandbox.run("caller", json!(null), 1, 1, VmState::default(), None) {
            SandboxOutcome::Suspended { descriptor, vm_state } => {
                assert_eq!(descriptor.service_name, "x");
                assert_eq!(descriptor.method_name, "f");
                assert!(vm_state.frames.is_empty());
            }
            other => panic!("expected suspension, got {:?}", other),
        }
    }

    #[test]
    fn test_resume_appends_frame_and_continues() {
        let sandbox = sandbox_with("two_calls", |ctx, _input| {
            let a = ctx.call_host_tool("x", "f", vec![json!(1)])?;
            let b = ctx.call_host_tool("x", "g", vec![a.clone()])?;
            Ok(json!([a, b]))
        });

        // First resume: f -> 10; the task should now ask for g.
        let outcome = sandbox.run(
            "two_calls",
            json!(null),
            1,
            1,
            VmState::default(),
            Some(ok_frame("x", "f", json!(10))),
        );
        let vm_state = match outcome {
            SandboxOutcome::Suspended { descriptor, vm_state } => {
                assert_eq!(descriptor.method_name, "g");
                assert_eq!(descriptor.args, vec![json!(10)]);
                assert_eq!(vm_state.frames.len(), 1);
                vm_state
            }
            other => panic!("expected suspension, got {:?}", other),
        };

        // Second resume: g -> 20; the task completes deterministically.
        match sandbox.run(
            "two_calls",
            json!(null),
            1,
            1,
            vm_state,
            Some(ok_frame("x", "g", json!(20))),
        ) {
            SandboxOutcome::Completed(v) => assert_eq!(v, json!([10, 20])),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_replayed_failure_propagates_with_question_mark() {
        let sandbox = sandbox_with("fragile", |ctx, _input| {
            let a = ctx.call_host_tool("x", "f", vec![])?;
            Ok(a)
        });
        let resume = ReplayFrame {
            service_name: "x".to_string(),
            method_name: "f".to_string(),
            outcome: FrameOutcome::Err {
                error: StepError::external("upstream exploded"),
            },
        };
        match sandbox.run("fragile", json!(null), 1, 1, VmState::default(), Some(resume)) {
            SandboxOutcome::Failed(e) => assert_eq!(e.message, "upstream exploded"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_task_can_handle_replayed_failure() {
        let sandbox = sandbox_with("sturdy", |ctx, _input| {
            match ctx.call_host_tool("x", "f", vec![]) {
                Ok(v) => Ok(v),
                Err(TaskInterrupt::Fail(_)) => Ok(json!("fallback")),
                Err(suspend) => Err(suspend),
            }
        });
        let resume = ReplayFrame {
            service_name: "x".to_string(),
            method_name: "f".to_string(),
            outcome: FrameOutcome::Err {
                error: StepError::external("nope"),
            },
        };
        match sandbox.run("sturdy", json!(null), 1, 1, VmState::default(), Some(resume)) {
            SandboxOutcome::Completed(v) => assert_eq!(v, json!("fallback")),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_becomes_task_code_error() {
        let sandbox = sandbox_with("boom", |_ctx, _input| panic!("kaboom"));
        match sandbox.run("boom", json!(null), 1, 3, VmState::default(), None) {
            SandboxOutcome::Failed(e) => {
                assert!(e.message.contains("kaboom"));
                assert_eq!(e.stack_run_id, Some(3));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_deterministic_replay_same_outcome() {
        let sandbox = sandbox_with("det", |ctx, input| {
            let base = input.as_i64().unwrap_or(0);
            let a = ctx.call_host_tool("x", "f", vec![json!(base)])?;
            Ok(json!(a.as_i64().unwrap_or(0) + base))
        });

        let state = VmState {
            frames: vec![ok_frame("x", "f", json!(40))],
        };
        for _ in 0..3 {
            match sandbox.run("det", json!(2), 1, 1, state.clone(), None) {
                SandboxOutcome::Completed(v) => assert_eq!(v, json!(42)),
                other => panic!("expected completion, got {:?}", other),
            }
        }
    }
}
