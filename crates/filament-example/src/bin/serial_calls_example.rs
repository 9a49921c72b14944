// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serial Calls Example - A task making two dependent external calls.
//!
//! This example shows:
//! - Engine setup over an embedded SQLite store
//! - A task suspending on `call_host_tool` and resuming with the result
//! - Step records left behind for diagnostics
//!
//! Run with: cargo run -p filament-example --bin serial_calls_example

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use filament_core::persistence::SqlitePersistence;
use filament_core::runtime::Engine;
use filament_example::{CalcEndpoint, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("=== Serial Calls Example ===");

    let dir = tempfile::tempdir()?;
    let store = Arc::new(SqlitePersistence::from_path(dir.path().join("example.db")).await?);

    let engine = Engine::builder()
        .persistence(store)
        .endpoint("calc", Arc::new(CalcEndpoint))
        .register_task("sum_then_scale", |task, input| {
            task.log("starting sum_then_scale");
            let base = input.as_i64().unwrap_or(0);
            // Each call suspends the task; on resume the function re-runs
            // from the top with the recorded results fed back in order.
            let sum = task.call_host_tool("calc", "add", vec![json!(base), json!(10)])?;
            let scaled = task.call_host_tool("calc", "mul", vec![sum.clone(), json!(3)])?;
            Ok(json!({"sum": sum, "scaled": scaled}))
        })
        .build()?;

    let task_run_id = engine.submit("sum_then_scale", json!(4)).await?;
    info!(task_run_id, "task submitted");

    let processed = engine.run_until_idle().await?;
    info!(processed, "queue drained");

    let status = engine
        .task_status(task_run_id)
        .await?
        .expect("task run exists");
    info!(status = %status.status, result = ?status.result, "final state");
    assert_eq!(status.result, Some(json!({"sum": 14, "scaled": 42})));

    for step in engine.chain_steps(task_run_id).await? {
        info!(
            step = step.id,
            service = %step.service_name,
            method = %step.method_name,
            status = %step.status,
            result = ?step.result,
            "step record"
        );
    }

    Ok(())
}
