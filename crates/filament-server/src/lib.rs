// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP ingress for the filament execution fabric.
//!
//! Provides endpoints for:
//! - Task submission (`/v1/tasks`)
//! - Status polling (`/v1/tasks/{id}`)
//! - The self-trigger cascade (`/internal/process-next`)
//! - Internal resume delivery (`/internal/resume`)
//! - Health check (`/health`)
//!
//! Internal routes are guarded by a shared secret header; everything else
//! is public to the submission clients.

use std::sync::Arc;

use filament_core::runtime::Engine;

pub mod handlers;
pub mod http;
pub mod setup;

/// Shared state for all HTTP handlers.
pub struct AppState {
    /// The embedded engine.
    pub engine: Arc<Engine>,
    /// Shared secret expected on internal trigger requests. Empty disables
    /// the check (single-machine development).
    pub trigger_secret: String,
}

impl AppState {
    /// Create the handler state.
    pub fn new(engine: Arc<Engine>, trigger_secret: impl Into<String>) -> Self {
        Self {
            engine,
            trigger_secret: trigger_secret.into(),
        }
    }
}
