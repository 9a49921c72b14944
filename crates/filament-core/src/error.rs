// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for filament-core.
//!
//! Provides a unified error type with stable error-code strings for the
//! ingress surface.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while driving the execution fabric.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Task run was not found in the store.
    TaskRunNotFound {
        /// The task run id that was not found.
        task_run_id: i64,
    },

    /// Stack run was not found in the store.
    StackRunNotFound {
        /// The stack run id that was not found.
        stack_run_id: i64,
    },

    /// No task with this name is registered.
    UnknownTask {
        /// The task name that was submitted.
        task_name: String,
    },

    /// No endpoint with this service name is registered.
    UnknownService {
        /// The service name a stack run asked for.
        service_name: String,
    },

    /// A record is in an invalid state for the requested transition.
    InvalidStateTransition {
        /// The stack run id.
        stack_run_id: i64,
        /// The expected status.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Durable store operation failed.
    StorageError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TaskRunNotFound { .. } => "TASK_RUN_NOT_FOUND",
            Self::StackRunNotFound { .. } => "STACK_RUN_NOT_FOUND",
            Self::UnknownTask { .. } => "UNKNOWN_TASK",
            Self::UnknownService { .. } => "UNKNOWN_SERVICE",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::StorageError { .. } => "STORAGE_ERROR",
        }
    }

    /// Shorthand for a storage error with an operation tag.
    pub fn storage(operation: &str, details: impl fmt::Display) -> Self {
        Self::StorageError {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskRunNotFound { task_run_id } => {
                write!(f, "Task run {} not found", task_run_id)
            }
            Self::StackRunNotFound { stack_run_id } => {
                write!(f, "Stack run {} not found", stack_run_id)
            }
            Self::UnknownTask { task_name } => {
                write!(f, "No task registered under '{}'", task_name)
            }
            Self::UnknownService { service_name } => {
                write!(f, "No endpoint registered for service '{}'", service_name)
            }
            Self::InvalidStateTransition {
                stack_run_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Stack run {} is in invalid state: expected '{}', got '{}'",
                    stack_run_id, expected, actual
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::StorageError { operation, details } => {
                write!(f, "Storage error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::StorageError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::StorageError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
