// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Nested Task Example - A task submitting a sub-task as a code step.
//!
//! The outer task calls `code.execute` with the sub-task's name and input;
//! the dispatcher routes that step back into the sandbox, the sub-task
//! suspends on its own external calls, and the outer task resumes with the
//! sub-task's final value. The awaited child of a suspended parent bypasses
//! the chain lock, so the single chain never deadlocks.
//!
//! Run with: cargo run -p filament-example --bin nested_task_example

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use filament_core::persistence::SqlitePersistence;
use filament_core::runtime::Engine;
use filament_example::{CalcEndpoint, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("=== Nested Task Example ===");

    let dir = tempfile::tempdir()?;
    let store = Arc::new(SqlitePersistence::from_path(dir.path().join("example.db")).await?);

    let engine = Engine::builder()
        .persistence(store)
        .endpoint("calc", Arc::new(CalcEndpoint))
        .register_task("outer", |task, input| {
            let doubled = task.call_host_tool("code", "execute", vec![json!("double"), input])?;
            let bumped = task.call_host_tool("calc", "add", vec![doubled, json!(1)])?;
            Ok(bumped)
        })
        .register_task("double", |task, input| {
            task.call_host_tool("calc", "mul", vec![input, json!(2)])
        })
        .build()?;

    let task_run_id = engine.submit("outer", json!(20)).await?;
    engine.run_until_idle().await?;

    let status = engine
        .task_status(task_run_id)
        .await?
        .expect("task run exists");
    info!(status = %status.status, result = ?status.result, "final state");
    assert_eq!(status.result, Some(json!(41)));

    let steps = engine.chain_steps(task_run_id).await?;
    info!(steps = steps.len(), "one chain, nested steps included");

    Ok(())
}
