// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failure Example - External failures propagate into task code.
//!
//! The first task lets the failure escape with `?`: the step and the task
//! run both end `failed`, and the structured error names the failing step.
//! The second task matches on the interrupt and substitutes a fallback.
//!
//! Run with: cargo run -p filament-example --bin failure_example

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use filament_core::persistence::SqlitePersistence;
use filament_core::runtime::Engine;
use filament_core::sandbox::TaskInterrupt;
use filament_example::{CalcEndpoint, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("=== Failure Example ===");

    let dir = tempfile::tempdir()?;
    let store = Arc::new(SqlitePersistence::from_path(dir.path().join("example.db")).await?);

    let engine = Engine::builder()
        .persistence(store)
        .endpoint("calc", Arc::new(CalcEndpoint))
        .register_task("brittle", |task, _input| {
            let v = task.call_host_tool("calc", "fail", vec![])?;
            Ok(v)
        })
        .register_task("resilient", |task, _input| {
            match task.call_host_tool("calc", "fail", vec![]) {
                Ok(v) => Ok(v),
                Err(TaskInterrupt::Fail(error)) => {
                    task.log(&format!("handled failure: {}", error.message));
                    Ok(json!("fallback"))
                }
                Err(suspend) => Err(suspend),
            }
        })
        .build()?;

    let brittle = engine.submit("brittle", json!(null)).await?;
    let resilient = engine.submit("resilient", json!(null)).await?;
    engine.run_until_idle().await?;

    let status = engine.task_status(brittle).await?.expect("task run exists");
    info!(status = %status.status, error = ?status.error, "brittle task");
    assert_eq!(status.status, "failed");
    let error = status.error.expect("failed task carries its error");
    assert!(error.stack_run_id.is_some());

    let status = engine
        .task_status(resilient)
        .await?
        .expect("task run exists");
    info!(status = %status.status, result = ?status.result, "resilient task");
    assert_eq!(status.result, Some(json!("fallback")));

    Ok(())
}
