// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E: the internal resume operation and its idempotence.

mod common;

use common::TestContext;
use filament_core::persistence::Persistence;
use filament_core::{CoreError, FrameOutcome, StepError};
use serde_json::json;

#[tokio::test]
async fn test_resume_applies_result_and_is_idempotent() {
    let ctx = TestContext::new(|builder| {
        builder.register_task("plus_one", |task, _input| {
            let answer = task.call_host_tool("x", "f", vec![])?;
            Ok(json!(answer.as_i64().unwrap_or(0) + 1))
        })
    })
    .await;

    let task_run_id = ctx.engine.submit("plus_one", json!(null)).await.unwrap();

    // Root suspends; the child is left pending for an external resume.
    ctx.engine.process_next().await.unwrap();
    let steps = ctx.engine.chain_steps(task_run_id).await.unwrap();
    let child = steps.iter().find(|s| !s.is_root()).unwrap().id;

    ctx.engine
        .resume(child, FrameOutcome::Ok { value: json!(41) })
        .await
        .unwrap();

    let status = ctx.engine.task_status(task_run_id).await.unwrap().unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.result, Some(json!(42)));

    // A duplicated trigger with any payload is harmless: the child is
    // terminal and the parent state is unchanged.
    ctx.engine
        .resume(child, FrameOutcome::Ok { value: json!(99) })
        .await
        .unwrap();
    ctx.engine
        .resume(
            child,
            FrameOutcome::Err {
                error: StepError::external("late failure"),
            },
        )
        .await
        .unwrap();

    let status = ctx.engine.task_status(task_run_id).await.unwrap().unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.result, Some(json!(42)));

    let child_rec = ctx.store.get_stack_run(child).await.unwrap().unwrap();
    assert_eq!(child_rec.status, "completed");
    assert_eq!(child_rec.result.as_deref(), Some("41"));
}

#[tokio::test]
async fn test_resume_unknown_stack_run_is_an_error() {
    let ctx = TestContext::new(|builder| builder).await;
    let err = ctx
        .engine
        .resume(424242, FrameOutcome::Ok { value: json!(1) })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StackRunNotFound { .. }));
}

#[tokio::test]
async fn test_resume_to_parent_waiting_on_different_child_is_noop() {
    let ctx = TestContext::new(|builder| {
        builder.register_task("waits", |task, _input| {
            let v = task.call_host_tool("x", "f", vec![])?;
            Ok(v)
        })
    })
    .await;

    let task_run_id = ctx.engine.submit("waits", json!(null)).await.unwrap();
    ctx.engine.process_next().await.unwrap();

    let steps = ctx.engine.chain_steps(task_run_id).await.unwrap();
    let root = steps.iter().find(|s| s.is_root()).unwrap();
    let child = steps.iter().find(|s| !s.is_root()).unwrap();

    // Point the parent at a different (fabricated) child, then finish the
    // real one: the parent must be left untouched, with the child's result
    // attached to the child record only.
    let other = ctx
        .store
        .create_stack_run(&filament_core::persistence::NewStackRun {
            parent_task_run_id: task_run_id,
            parent_stack_run_id: Some(root.id),
            service_name: "x".to_string(),
            method_name: "other".to_string(),
            args: "[]".to_string(),
        })
        .await
        .unwrap();
    ctx.store
        .suspend_stack_run(root.id, other, "{\"frames\":[]}")
        .await
        .unwrap();

    ctx.engine
        .resume(child.id, FrameOutcome::Ok { value: json!(5) })
        .await
        .unwrap();

    let root_rec = ctx.store.get_stack_run(root.id).await.unwrap().unwrap();
    assert_eq!(root_rec.status, "suspended_waiting_child");
    assert_eq!(root_rec.waiting_on_stack_run_id, Some(other));

    let child_rec = ctx.store.get_stack_run(child.id).await.unwrap().unwrap();
    assert_eq!(child_rec.status, "completed");
    assert_eq!(child_rec.result.as_deref(), Some("5"));
}
