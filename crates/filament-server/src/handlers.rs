// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ingress request handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use filament_core::processor::ProcessReport;
use filament_core::trigger::TRIGGER_SECRET_HEADER;
use filament_core::{CoreError, FrameOutcome, StepError};

use crate::AppState;

/// JSON error body with the core's stable error code.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Wrapper mapping [`CoreError`] onto HTTP responses.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::TaskRunNotFound { .. } | CoreError::StackRunNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            CoreError::UnknownTask { .. }
            | CoreError::UnknownService { .. }
            | CoreError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            CoreError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            CoreError::StorageError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            code: self.0.error_code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Submission surface
// ============================================================================

/// Body of `POST /v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Registered task name.
    pub task_name: String,
    /// Task input, any JSON value.
    #[serde(default)]
    pub input: Value,
}

/// Response of `POST /v1/tasks`.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    /// The created task run.
    pub task_run_id: i64,
}

/// Accept a task by name and enqueue it.
#[instrument(skip(state, request), fields(task_name = %request.task_name))]
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let task_run_id = state.engine.submit(&request.task_name, request.input).await?;
    info!(task_run_id, "task accepted");
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_run_id })))
}

/// Poll a task run's status.
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<filament_core::TaskStatusView>, ApiError> {
    match state.engine.task_status(id).await? {
        Some(view) => Ok(Json(view)),
        None => Err(CoreError::TaskRunNotFound { task_run_id: id }.into()),
    }
}

// ============================================================================
// Internal surface
// ============================================================================

fn check_trigger_secret(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if state.trigger_secret.is_empty() {
        return Ok(());
    }
    let presented = headers
        .get(TRIGGER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != state.trigger_secret {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                code: "UNAUTHORIZED".to_string(),
                message: "missing or invalid trigger secret".to_string(),
            }),
        )
            .into_response());
    }
    Ok(())
}

/// Response of `POST /internal/process-next`.
#[derive(Debug, Serialize)]
pub struct ProcessNextResponse {
    /// Whether a step was executed this round.
    pub processed: bool,
    /// The executed step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_run_id: Option<i64>,
    /// Whether the executed step reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
}

/// Self-trigger entry point: one sweep pass plus at most one processed step.
pub async fn process_next(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ProcessNextResponse>, Response> {
    check_trigger_secret(&state, &headers)?;

    let report = state
        .engine
        .process_next()
        .await
        .map_err(|e| ApiError::from(e).into_response())?;

    let body = match report {
        ProcessReport::Idle => ProcessNextResponse {
            processed: false,
            stack_run_id: None,
            terminal: None,
        },
        ProcessReport::Processed {
            stack_run_id,
            terminal,
        } => ProcessNextResponse {
            processed: true,
            stack_run_id: Some(stack_run_id),
            terminal: Some(terminal),
        },
    };
    Ok(Json(body))
}

/// Body of `POST /internal/resume`: exactly one of `result`/`error`.
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    /// The stack run the result belongs to.
    pub stack_run_id: i64,
    /// Successful result value.
    #[serde(default)]
    pub result: Option<Value>,
    /// Structured failure.
    #[serde(default)]
    pub error: Option<StepError>,
}

/// Deliver an externally-produced step result and propagate it.
pub async fn resume(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ResumeRequest>,
) -> Result<StatusCode, Response> {
    check_trigger_secret(&state, &headers)?;

    let outcome = match (request.result, request.error) {
        (Some(value), None) => FrameOutcome::Ok { value },
        (None, Some(error)) => FrameOutcome::Err { error },
        _ => {
            return Err(ApiError::from(CoreError::ValidationError {
                field: "result".to_string(),
                message: "exactly one of result/error is required".to_string(),
            })
            .into_response());
        }
    };

    state
        .engine
        .resume(request.stack_run_id, outcome)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Observability
// ============================================================================

/// Health of the worker and its store.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall verdict.
    pub healthy: bool,
}

/// Store-backed health check.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let healthy = state.engine.health().await?;
    Ok(Json(HealthResponse { healthy }))
}
