// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E: one external call suspends and resumes a task to completion.

mod common;

use common::TestContext;
use filament_core::persistence::Persistence;
use serde_json::json;

#[tokio::test]
async fn test_single_external_call_completes() {
    let ctx = TestContext::new(|builder| {
        builder.register_task("plus_one", |task, _input| {
            let answer = task.call_host_tool("x", "f", vec![json!(1)])?;
            Ok(json!(answer.as_i64().unwrap_or(0) + 1))
        })
    })
    .await;
    ctx.endpoint.respond("f", json!(41));

    let task_run_id = ctx.engine.submit("plus_one", json!(null)).await.unwrap();
    assert_eq!(ctx.task_status(task_run_id).await, "queued");

    ctx.engine.run_until_idle().await.unwrap();

    // Task run completed with the computed value.
    let status = ctx.engine.task_status(task_run_id).await.unwrap().unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.result, Some(json!(42)));
    assert!(status.error.is_none());
    assert!(status.waiting_on.is_none());

    // Two stack runs exist (root code step + external step), both completed.
    let steps = ctx.engine.chain_steps(task_run_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s.status == "completed"));

    let root = &steps[0];
    assert!(root.is_root());
    assert_eq!(root.service_name, "code");

    let child = &steps[1];
    assert_eq!(child.parent_stack_run_id, Some(root.id));
    assert_eq!(child.service_name, "x");
    assert_eq!(child.method_name, "f");
    assert_eq!(child.result.as_deref(), Some("41"));

    // The endpoint saw the recorded args verbatim.
    assert_eq!(ctx.endpoint.calls(), vec!["f"]);
    assert_eq!(ctx.endpoint.call_args(0), Some(vec![json!(1)]));

    // No locks remain.
    assert!(
        ctx.store
            .get_task_lock(task_run_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_suspension_is_durably_recorded() {
    let ctx = TestContext::new(|builder| {
        builder.register_task("waits", |task, _input| {
            let v = task.call_host_tool("x", "slow/op", vec![json!("payload")])?;
            Ok(v)
        })
    })
    .await;

    let task_run_id = ctx.engine.submit("waits", json!(null)).await.unwrap();

    // One round: the root step runs and suspends.
    ctx.engine.process_next().await.unwrap();

    let status = ctx.engine.task_status(task_run_id).await.unwrap().unwrap();
    assert_eq!(status.status, "suspended");
    let waiting_on = status.waiting_on.expect("suspended task names its child");

    let steps = ctx.engine.chain_steps(task_run_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    let root = &steps[0];
    assert_eq!(root.status, "suspended_waiting_child");
    assert_eq!(root.waiting_on_stack_run_id, Some(waiting_on));
    assert!(root.vm_state.is_some());

    let child = &steps[1];
    assert_eq!(child.id, waiting_on);
    assert_eq!(child.status, "pending");
    assert_eq!(child.method_name, "slow/op");
    assert_eq!(child.args, "[\"payload\"]");
    assert!(child.result.is_none());
}
