// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared domain types: status enums, the structured step error record, the
//! serialized replay log, and the suspension descriptor.
//!
//! Statuses are persisted as TEXT; the enums here are the only place the
//! literal strings live.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Service name that routes a stack run into the task sandbox instead of an
/// external endpoint. The root step of every chain uses it.
pub const CODE_SERVICE: &str = "code";

/// Method name for code steps.
pub const CODE_METHOD: &str = "execute";

/// Status of a task run (one per submitted workflow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRunStatus {
    /// Submitted, root step not picked up yet.
    Queued,
    /// Root step is executing (or between resumes).
    Running,
    /// Root step is waiting on a child stack run.
    Suspended,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskRunStatus {
    /// The persisted TEXT form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task run status '{}'", other)),
        }
    }
}

/// Status of a stack run (one per externally-visible step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackRunStatus {
    /// Created, not picked up yet.
    Pending,
    /// A worker is executing this step right now.
    Processing,
    /// Suspended until the awaited child reaches a terminal state.
    SuspendedWaitingChild,
    /// Child finished; resume payload attached, re-entry due.
    PendingResume,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl StackRunStatus {
    /// The persisted TEXT form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::SuspendedWaitingChild => "suspended_waiting_child",
            Self::PendingResume => "pending_resume",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Is this step eligible for selection by the processor?
    ///
    /// `pending_resume` is runnable so a crash between the resume guard and
    /// sandbox re-entry is recovered by the next trigger.
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Pending | Self::PendingResume)
    }
}

impl fmt::Display for StackRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "suspended_waiting_child" => Ok(Self::SuspendedWaitingChild),
            "pending_resume" => Ok(Self::PendingResume),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown stack run status '{}'", other)),
        }
    }
}

/// Classification of a step failure, visible to clients polling status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Task code threw or panicked.
    TaskCodeError,
    /// The endpoint responded with a structured failure.
    ExternalError,
    /// Network or timeout reaching the endpoint.
    TransportError,
    /// Step stuck in processing past the stale threshold.
    Timeout,
    /// Malformed submission or resume payload.
    ValidationError,
    /// The durable store itself failed.
    StorageError,
}

/// Structured error record attached to failed steps and task runs.
///
/// Serialized as JSON into the `error` columns so clients see
/// `{kind, message, details?, stack_run_id?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload (endpoint error body, panic info).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// The failing step, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_run_id: Option<i64>,
}

impl StepError {
    /// Build an error of the given kind with no details attached.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            stack_run_id: None,
        }
    }

    /// Task code threw or panicked.
    pub fn task_code(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TaskCodeError, message)
    }

    /// Endpoint responded with a structured failure.
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalError, message)
    }

    /// Network or timeout reaching the endpoint.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    /// Synthetic timeout written by the sweeper.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Attach the failing step id.
    pub fn with_stack_run(mut self, stack_run_id: i64) -> Self {
        self.stack_run_id = Some(stack_run_id);
        self
    }

    /// Attach a structured payload.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize for an `error` column.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"kind\":\"storage_error\",\"message\":{:?}}}",
                self.message
            )
        })
    }

    /// Parse an `error` column; malformed records degrade to a storage
    /// error carrying the raw text.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            kind: ErrorKind::StorageError,
            message: raw.to_string(),
            details: None,
            stack_run_id: None,
        })
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// The external call a suspended task is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionDescriptor {
    /// Named endpoint, or [`CODE_SERVICE`] for a nested task.
    pub service_name: String,
    /// Method path, recorded verbatim.
    pub method_name: String,
    /// JSON argument vector.
    pub args: Vec<Value>,
}

/// Outcome of one recorded external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameOutcome {
    /// The call succeeded with this value.
    Ok {
        /// Result value handed back to task code.
        value: Value,
    },
    /// The call failed; task code sees the error on replay.
    Err {
        /// The recorded failure.
        error: StepError,
    },
}

/// One entry of the replay log: a prior external call and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Service the call went to.
    pub service_name: String,
    /// Method path of the call.
    pub method_name: String,
    /// What came back.
    pub outcome: FrameOutcome,
}

/// Serialized continuation of a code step: the ordered list of prior
/// external results. Re-running the task with these frames drives it back
/// to its next suspension point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmState {
    /// Replay frames in call order.
    pub frames: Vec<ReplayFrame>,
}

impl VmState {
    /// Parse a `vm_state` column; absent column means a fresh execution.
    pub fn from_column(raw: Option<&str>) -> Result<Self, serde_json::Error> {
        match raw {
            Some(text) => serde_json::from_str(text),
            None => Ok(Self::default()),
        }
    }

    /// Serialize for the `vm_state` column.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskRunStatus::Queued,
            TaskRunStatus::Running,
            TaskRunStatus::Suspended,
            TaskRunStatus::Completed,
            TaskRunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskRunStatus>(), Ok(status));
        }
        for status in [
            StackRunStatus::Pending,
            StackRunStatus::Processing,
            StackRunStatus::SuspendedWaitingChild,
            StackRunStatus::PendingResume,
            StackRunStatus::Completed,
            StackRunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<StackRunStatus>(), Ok(status));
        }
        assert!("bogus".parse::<StackRunStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_runnable() {
        assert!(StackRunStatus::Completed.is_terminal());
        assert!(StackRunStatus::Failed.is_terminal());
        assert!(!StackRunStatus::SuspendedWaitingChild.is_terminal());

        assert!(StackRunStatus::Pending.is_runnable());
        assert!(StackRunStatus::PendingResume.is_runnable());
        assert!(!StackRunStatus::Processing.is_runnable());
    }

    #[test]
    fn test_step_error_json() {
        let err = StepError::external("upstream said no")
            .with_stack_run(12)
            .with_details(json!({"status": 502}));
        let raw = err.to_json();
        let parsed = StepError::from_json(&raw);
        assert_eq!(parsed, err);
        assert!(raw.contains("\"kind\":\"external_error\""));

        // Malformed text degrades instead of failing.
        let degraded = StepError::from_json("not json at all");
        assert_eq!(degraded.kind, ErrorKind::StorageError);
        assert_eq!(degraded.message, "not json at all");
    }

    #[test]
    fn test_vm_state_round_trip() {
        let state = VmState {
            frames: vec![
                ReplayFrame {
                    service_name: "search".to_string(),
                    method_name: "web/query".to_string(),
                    outcome: FrameOutcome::Ok { value: json!(41) },
                },
                ReplayFrame {
                    service_name: "mail".to_string(),
                    method_name: "send".to_string(),
                    outcome: FrameOutcome::Err {
                        error: StepError::transport("connect timeout"),
                    },
                },
            ],
        };
        let raw = state.to_json().unwrap();
        let parsed = VmState::from_column(Some(&raw)).unwrap();
        assert_eq!(parsed, state);

        assert_eq!(VmState::from_column(None).unwrap(), VmState::default());
    }
}
