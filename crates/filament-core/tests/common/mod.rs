// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test context for the end-to-end suites.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use filament_core::StepError;
use filament_core::dispatch::{Endpoint, EndpointReply};
use filament_core::persistence::SqlitePersistence;
use filament_core::runtime::{Engine, EngineBuilder};

/// Canned reply for one mock invocation.
enum CannedReply {
    Value(Value),
    Error(StepError),
    Suspended(i64),
}

/// In-process stand-in for a wrapped external service. Replies are queued
/// per method path and consumed in order; every invocation is recorded.
pub struct MockEndpoint {
    responses: Mutex<HashMap<String, VecDeque<CannedReply>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        })
    }

    /// Queue a successful reply for a method path.
    pub fn respond(&self, method: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(CannedReply::Value(value));
    }

    /// Queue a structured failure for a method path.
    pub fn fail(&self, method: &str, error: StepError) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(CannedReply::Error(error));
    }

    /// Queue a nested-suspension signal for a method path.
    pub fn suspend(&self, method: &str, stack_run_id: i64) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(CannedReply::Suspended(stack_run_id));
    }

    /// Delay every invocation (for concurrency scenarios).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Method paths in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    /// Recorded args of the n-th invocation.
    pub fn call_args(&self, n: usize) -> Option<Vec<Value>> {
        self.calls.lock().unwrap().get(n).map(|(_, args)| args.clone())
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn invoke(&self, method_path: &str, args: &[Value]) -> EndpointReply {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls
            .lock()
            .unwrap()
            .push((method_path.to_string(), args.to_vec()));

        let canned = self
            .responses
            .lock()
            .unwrap()
            .get_mut(method_path)
            .and_then(VecDeque::pop_front);

        match canned {
            Some(CannedReply::Value(value)) => EndpointReply::Value(value),
            Some(CannedReply::Error(error)) => EndpointReply::Error(error),
            Some(CannedReply::Suspended(id)) => EndpointReply::Suspended(id),
            None => EndpointReply::Error(StepError::external(format!(
                "no canned response for '{}'",
                method_path
            ))),
        }
    }
}

/// One engine over a fresh SQLite store plus the mock endpoint "x".
pub struct TestContext {
    pub engine: Arc<Engine>,
    pub store: Arc<SqlitePersistence>,
    pub endpoint: Arc<MockEndpoint>,
    _dir: tempfile::TempDir,
}

impl TestContext {
    /// Build a context; `configure` registers the scenario's tasks.
    pub async fn new(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(
            SqlitePersistence::from_path(dir.path().join("fabric.db"))
                .await
                .expect("sqlite store"),
        );
        let endpoint = MockEndpoint::new();

        let builder = Engine::builder()
            .persistence(store.clone())
            .endpoint("x", endpoint.clone());
        let engine = Arc::new(configure(builder).build().expect("engine"));

        Self {
            engine,
            store,
            endpoint,
            _dir: dir,
        }
    }

    /// Age a stack run's `updated_at` so the sweeper sees it as stale.
    pub async fn backdate_stack_run(&self, stack_run_id: i64, age: Duration) {
        let stale = chrono::Utc::now() - chrono::Duration::from_std(age).unwrap();
        sqlx::query("UPDATE stack_runs SET updated_at = ? WHERE id = ?")
            .bind(stale)
            .bind(stack_run_id)
            .execute(self.store.pool())
            .await
            .expect("backdate stack run");
    }

    /// Age a chain lock's `locked_at`.
    pub async fn backdate_lock(&self, task_run_id: i64, age: Duration) {
        let stale = chrono::Utc::now() - chrono::Duration::from_std(age).unwrap();
        sqlx::query("UPDATE task_locks SET locked_at = ? WHERE task_run_id = ?")
            .bind(stale)
            .bind(task_run_id)
            .execute(self.store.pool())
            .await
            .expect("backdate lock");
    }

    /// Status string of a task run.
    pub async fn task_status(&self, task_run_id: i64) -> String {
        self.engine
            .task_status(task_run_id)
            .await
            .expect("status query")
            .expect("task run exists")
            .status
    }
}
