// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E: stale lock and stuck step reclamation.

mod common;

use std::time::Duration;

use common::TestContext;
use filament_core::ErrorKind;
use filament_core::persistence::{NewStackRun, Persistence};
use filament_core::processor::ProcessReport;
use serde_json::json;

#[tokio::test]
async fn test_stuck_step_reclaimed_and_chain_unblocked() {
    let ctx = TestContext::new(|builder| builder).await;
    ctx.endpoint.respond("g", json!(7));

    // A crashed worker left a step in processing and the chain locked.
    let chain = ctx.store.create_task_run("manual", "null").await.unwrap();
    let stuck = ctx
        .store
        .create_stack_run(&NewStackRun {
            parent_task_run_id: chain,
            parent_stack_run_id: None,
            service_name: "x".to_string(),
            method_name: "f".to_string(),
            args: "[]".to_string(),
        })
        .await
        .unwrap();
    assert!(ctx.store.mark_stack_run_processing(stuck).await.unwrap());
    assert!(
        ctx.store
            .try_acquire_task_lock(chain, "dead-worker")
            .await
            .unwrap()
    );
    ctx.backdate_stack_run(stuck, Duration::from_secs(600)).await;
    ctx.backdate_lock(chain, Duration::from_secs(600)).await;

    // A newer pending step in the same chain is blocked behind the lock.
    let next = ctx
        .store
        .create_stack_run(&NewStackRun {
            parent_task_run_id: chain,
            parent_stack_run_id: None,
            service_name: "x".to_string(),
            method_name: "g".to_string(),
            args: "[]".to_string(),
        })
        .await
        .unwrap();

    // One trigger runs the sweep, then the freed chain makes progress.
    match ctx.engine.process_next().await.unwrap() {
        ProcessReport::Processed { stack_run_id, .. } => assert_eq!(stack_run_id, next),
        other => panic!("expected the unblocked step to run, got {:?}", other),
    }

    let stuck_rec = ctx.store.get_stack_run(stuck).await.unwrap().unwrap();
    assert_eq!(stuck_rec.status, "failed");
    let error = filament_core::StepError::from_json(stuck_rec.error.as_deref().unwrap());
    assert_eq!(error.kind, ErrorKind::Timeout);

    let next_rec = ctx.store.get_stack_run(next).await.unwrap().unwrap();
    assert_eq!(next_rec.status, "completed");

    assert!(ctx.store.get_task_lock(chain).await.unwrap().is_none());
}

#[tokio::test]
async fn test_timed_out_child_fails_waiting_parent() {
    let ctx = TestContext::new(|builder| {
        builder.register_task("waits", |task, _input| {
            let v = task.call_host_tool("x", "f", vec![])?;
            Ok(v)
        })
    })
    .await;

    let task_run_id = ctx.engine.submit("waits", json!(null)).await.unwrap();

    // Root suspends on its child.
    ctx.engine.process_next().await.unwrap();
    let steps = ctx.engine.chain_steps(task_run_id).await.unwrap();
    let child = steps.iter().find(|s| !s.is_root()).unwrap().id;

    // Simulate a worker that claimed the child and died mid-call.
    assert!(ctx.store.mark_stack_run_processing(child).await.unwrap());
    ctx.backdate_stack_run(child, Duration::from_secs(600)).await;

    // The next trigger reclaims the child and wakes the parent with the
    // failure; the task code propagates it.
    ctx.engine.run_until_idle().await.unwrap();

    let status = ctx.engine.task_status(task_run_id).await.unwrap().unwrap();
    assert_eq!(status.status, "failed");
    let error = status.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.stack_run_id, Some(child));

    assert!(
        ctx.store
            .get_task_lock(task_run_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_stale_lock_swept_without_stuck_step() {
    let ctx = TestContext::new(|builder| builder).await;

    let chain = ctx.store.create_task_run("manual", "null").await.unwrap();
    assert!(
        ctx.store
            .try_acquire_task_lock(chain, "dead-worker")
            .await
            .unwrap()
    );
    ctx.backdate_lock(chain, Duration::from_secs(600)).await;

    // Idle round still sweeps.
    assert_eq!(
        ctx.engine.process_next().await.unwrap(),
        ProcessReport::Idle
    );
    assert!(ctx.store.get_task_lock(chain).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fresh_locks_and_steps_survive_sweep() {
    let ctx = TestContext::new(|builder| builder).await;

    let chain = ctx.store.create_task_run("manual", "null").await.unwrap();
    let step = ctx
        .store
        .create_stack_run(&NewStackRun {
            parent_task_run_id: chain,
            parent_stack_run_id: None,
            service_name: "x".to_string(),
            method_name: "f".to_string(),
            args: "[]".to_string(),
        })
        .await
        .unwrap();
    assert!(ctx.store.mark_stack_run_processing(step).await.unwrap());
    assert!(
        ctx.store
            .try_acquire_task_lock(chain, "live-worker")
            .await
            .unwrap()
    );

    ctx.engine.process_next().await.unwrap();

    // Neither the fresh lock nor the in-flight step was touched.
    assert!(ctx.store.get_task_lock(chain).await.unwrap().is_some());
    let rec = ctx.store.get_stack_run(step).await.unwrap().unwrap();
    assert_eq!(rec.status, "processing");
}
