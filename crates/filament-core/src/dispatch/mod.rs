// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service dispatcher: invokes the endpoint a pending stack run names and
//! classifies the outcome.
//!
//! Steps are either code steps (the task sandbox itself) or external steps
//! (a named endpoint). The caller must have marked the step `processing`
//! before dispatch so a crash mid-call is observable.

pub mod endpoint;

pub use endpoint::{Endpoint, EndpointReply, HttpEndpoint, ResultShaper, ShapeRule};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::capture;
use crate::model::{CODE_SERVICE, ReplayFrame, StepError, VmState};
use crate::persistence::{Persistence, StackRunRecord};
use crate::sandbox::{SandboxOutcome, TaskSandbox};

/// Classified outcome of dispatching one stack run.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The step produced a value.
    Completed(Value),
    /// The step's processing suspended on this child stack run.
    ChildSuspended(i64),
    /// The step failed.
    Failed(StepError),
}

/// Routes stack runs to the sandbox or to named external endpoints.
pub struct ServiceDispatcher {
    store: Arc<dyn Persistence>,
    sandbox: TaskSandbox,
    endpoints: HashMap<String, Arc<dyn Endpoint>>,
    shaper: ResultShaper,
}

impl ServiceDispatcher {
    /// Create a dispatcher over the given store and sandbox.
    pub fn new(store: Arc<dyn Persistence>, sandbox: TaskSandbox, shaper: ResultShaper) -> Self {
        Self {
            store,
            sandbox,
            endpoints: HashMap::new(),
            shaper,
        }
    }

    /// Register an endpoint under a service name.
    pub fn register_endpoint(&mut self, service_name: impl Into<String>, ep: Arc<dyn Endpoint>) {
        self.endpoints.insert(service_name.into(), ep);
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Dispatch one stack run. The record must already be `processing`.
    pub async fn dispatch(&self, run: &StackRunRecord) -> DispatchOutcome {
        if run.service_name == CODE_SERVICE {
            self.dispatch_code(run).await
        } else {
            self.dispatch_external(run).await
        }
    }

    /// Code step: re-enter the sandbox with the recorded replay log and any
    /// attached resume payload. A fresh suspension is persisted through
    /// continuation capture before being classified.
    async fn dispatch_code(&self, run: &StackRunRecord) -> DispatchOutcome {
        let (task_name, input) = match parse_code_args(&run.args) {
            Ok(parsed) => parsed,
            Err(e) => return DispatchOutcome::Failed(e.with_stack_run(run.id)),
        };

        let vm_state = match VmState::from_column(run.vm_state.as_deref()) {
            Ok(state) => state,
            Err(e) => {
                return DispatchOutcome::Failed(
                    StepError::task_code(format!("corrupt replay log: {}", e))
                        .with_stack_run(run.id),
                );
            }
        };

        let resume: Option<ReplayFrame> = match run.resume_payload.as_deref() {
            Some(raw) => match serde_json::from_str(raw) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    return DispatchOutcome::Failed(
                        StepError::task_code(format!("corrupt resume payload: {}", e))
                            .with_stack_run(run.id),
                    );
                }
            },
            None => None,
        };

        let outcome = self.sandbox.run(
            &task_name,
            input,
            run.parent_task_run_id,
            run.id,
            vm_state,
            resume,
        );

        match outcome {
            SandboxOutcome::Completed(value) => DispatchOutcome::Completed(value),
            SandboxOutcome::Failed(error) => DispatchOutcome::Failed(error),
            SandboxOutcome::Suspended {
                descriptor,
                vm_state,
            } => match capture::persist_suspension(&*self.store, run, &descriptor, &vm_state).await
            {
                Ok(child_id) => DispatchOutcome::ChildSuspended(child_id),
                Err(e) => {
                    warn!(stack_run_id = run.id, error = %e, "failed to capture suspension");
                    DispatchOutcome::Failed(
                        StepError::new(
                            crate::model::ErrorKind::StorageError,
                            format!("failed to capture suspension: {}", e),
                        )
                        .with_stack_run(run.id),
                    )
                }
            },
        }
    }

    /// External step: one outbound call, byte-transparent except for the
    /// declarative shaping table and the suspension signal.
    async fn dispatch_external(&self, run: &StackRunRecord) -> DispatchOutcome {
        // A crash-recovered step that already has its nested outcome
        // attached: apply it instead of re-issuing the call.
        if let Some(raw) = run.resume_payload.as_deref() {
            return match serde_json::from_str::<ReplayFrame>(raw) {
                Ok(frame) => match frame.outcome {
                    crate::model::FrameOutcome::Ok { value } => DispatchOutcome::Completed(value),
                    crate::model::FrameOutcome::Err { error } => DispatchOutcome::Failed(error),
                },
                Err(e) => DispatchOutcome::Failed(
                    StepError::task_code(format!("corrupt resume payload: {}", e))
                        .with_stack_run(run.id),
                ),
            };
        }

        let Some(ep) = self.endpoints.get(&run.service_name) else {
            return DispatchOutcome::Failed(
                StepError::external(format!(
                    "no endpoint registered for service '{}'",
                    run.service_name
                ))
                .with_stack_run(run.id),
            );
        };

        let args: Vec<Value> = match serde_json::from_str(&run.args) {
            Ok(args) => args,
            Err(e) => {
                return DispatchOutcome::Failed(
                    StepError::new(
                        crate::model::ErrorKind::ValidationError,
                        format!("malformed argument vector: {}", e),
                    )
                    .with_stack_run(run.id),
                );
            }
        };

        debug!(
            stack_run_id = run.id,
            service = %run.service_name,
            method = %run.method_name,
            "invoking external endpoint"
        );

        match ep.invoke(&run.method_name, &args).await {
            EndpointReply::Value(value) => DispatchOutcome::Completed(self.shaper.shape(
                &run.service_name,
                &run.method_name,
                value,
            )),
            EndpointReply::Error(error) => {
                let error = if error.stack_run_id.is_none() {
                    error.with_stack_run(run.id)
                } else {
                    error
                };
                DispatchOutcome::Failed(error)
            }
            EndpointReply::Suspended(child_id) => {
                self.record_external_suspension(run, child_id).await
            }
        }
    }

    /// The endpoint's processing suspended on an existing stack run; record
    /// the wait edge. A pointer to a nonexistent child is never written.
    async fn record_external_suspension(
        &self,
        run: &StackRunRecord,
        child_id: i64,
    ) -> DispatchOutcome {
        match self.store.get_stack_run(child_id).await {
            Ok(Some(_)) => {
                let empty = VmState::default().to_json().unwrap_or_else(|_| "{}".into());
                match self.store.suspend_stack_run(run.id, child_id, &empty).await {
                    Ok(()) => DispatchOutcome::ChildSuspended(child_id),
                    Err(e) => DispatchOutcome::Failed(
                        StepError::new(
                            crate::model::ErrorKind::StorageError,
                            format!("failed to record suspension: {}", e),
                        )
                        .with_stack_run(run.id),
                    ),
                }
            }
            Ok(None) => DispatchOutcome::Failed(
                StepError::external(format!(
                    "endpoint signalled suspension on unknown stack run {}",
                    child_id
                ))
                .with_stack_run(run.id),
            ),
            Err(e) => DispatchOutcome::Failed(
                StepError::new(
                    crate::model::ErrorKind::StorageError,
                    format!("failed to verify suspension target: {}", e),
                )
                .with_stack_run(run.id),
            ),
        }
    }
}

/// Code step args are `[task_name, input]`.
fn parse_code_args(raw: &str) -> Result<(String, Value), StepError> {
    let args: Vec<Value> = serde_json::from_str(raw)
        .map_err(|e| StepError::task_code(format!("malformed code step args: {}", e)))?;
    let task_name = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::task_code("code step args missing task name"))?
        .to_string();
    let input = args.get(1).cloned().unwrap_or(Value::Null);
    Ok((task_name, input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_code_args() {
        let (name, input) = parse_code_args("[\"greet\", {\"who\": \"x\"}]").unwrap();
        assert_eq!(name, "greet");
        assert_eq!(input, json!({"who": "x"}));

        let (name, input) = parse_code_args("[\"bare\"]").unwrap();
        assert_eq!(name, "bare");
        assert_eq!(input, Value::Null);

        assert!(parse_code_args("[1, 2]").is_err());
        assert!(parse_code_args("not json").is_err());
    }
}
