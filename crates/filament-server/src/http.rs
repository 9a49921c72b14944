// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP router for the ingress surface.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;
use crate::handlers;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Submission surface
        .route("/v1/tasks", post(handlers::submit_task))
        .route("/v1/tasks/{id}", get(handlers::task_status))
        // Internal surface (shared-secret guarded)
        .route("/internal/process-next", post(handlers::process_next))
        .route("/internal/resume", post(handlers::resume))
        // Observability
        .route("/health", get(handlers::health_check))
        .layer(cors)
        .with_state(state)
}
