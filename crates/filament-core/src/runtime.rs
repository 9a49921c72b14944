// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable engine for filament-core.
//!
//! [`Engine`] ties the store, sandbox, dispatcher, processor and sweeper
//! together behind one handle that can be embedded into an existing tokio
//! application or wrapped by the HTTP server.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use filament_core::runtime::Engine;
//! use filament_core::persistence::SqlitePersistence;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqlitePersistence::from_path(".data/filament.db").await?);
//!
//!     let engine = Engine::builder()
//!         .persistence(store)
//!         .register_task("double", |ctx, input| {
//!             let n = input.as_i64().unwrap_or(0);
//!             Ok(serde_json::json!(n * 2))
//!         })
//!         .build()?;
//!
//!     let task_run_id = engine.submit("double", serde_json::json!(21)).await?;
//!     engine.run_until_idle().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatch::{Endpoint, ResultShaper, ServiceDispatcher, ShapeRule};
use crate::error::CoreError;
use crate::model::{CODE_METHOD, CODE_SERVICE, FrameOutcome, StepError};
use crate::persistence::{NewStackRun, Persistence, StackRunRecord, TaskRunRecord};
use crate::processor::{ProcessReport, ProcessorConfig, StackProcessor};
use crate::sandbox::{TaskContext, TaskInterrupt, TaskRegistry, TaskSandbox};
use crate::sweeper::{Sweeper, SweeperConfig};
use crate::trigger::{NullTrigger, Trigger};

/// Builder for creating an [`Engine`].
pub struct EngineBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    tasks: TaskRegistry,
    endpoints: Vec<(String, Arc<dyn Endpoint>)>,
    shape_rules: Vec<ShapeRule>,
    trigger: Option<Arc<dyn Trigger>>,
    processor_config: ProcessorConfig,
    sweeper_config: SweeperConfig,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("tasks", &self.tasks.names())
            .field(
                "endpoints",
                &self.endpoints.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            tasks: TaskRegistry::new(),
            endpoints: Vec::new(),
            shape_rules: Vec::new(),
            trigger: None,
            processor_config: ProcessorConfig::default(),
            sweeper_config: SweeperConfig::default(),
        }
    }
}

impl EngineBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Register a task function under a name.
    pub fn register_task<F>(mut self, name: impl Into<String>, task: F) -> Self
    where
        F: Fn(&mut TaskContext, Value) -> Result<Value, TaskInterrupt> + Send + Sync + 'static,
    {
        self.tasks.register(name, task);
        self
    }

    /// Register an external endpoint under a service name.
    pub fn endpoint(mut self, service_name: impl Into<String>, ep: Arc<dyn Endpoint>) -> Self {
        self.endpoints.push((service_name.into(), ep));
        self
    }

    /// Add a result-shaping rule.
    pub fn shape_rule(mut self, rule: ShapeRule) -> Self {
        self.shape_rules.push(rule);
        self
    }

    /// Set the cascade trigger. Defaults to a no-op trigger.
    pub fn trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Override processor tuning.
    pub fn processor_config(mut self, config: ProcessorConfig) -> Self {
        self.processor_config = config;
        self
    }

    /// Override sweeper thresholds.
    pub fn sweeper_config(mut self, config: SweeperConfig) -> Self {
        self.sweeper_config = config;
        self
    }

    /// Build the engine.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<Engine> {
        let store = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;

        let tasks = Arc::new(self.tasks);
        let trigger: Arc<dyn Trigger> = self.trigger.unwrap_or_else(|| Arc::new(NullTrigger));

        let mut dispatcher = ServiceDispatcher::new(
            store.clone(),
            TaskSandbox::new(tasks.clone()),
            ResultShaper::new(self.shape_rules),
        );
        for (name, ep) in self.endpoints {
            dispatcher.register_endpoint(name, ep);
        }

        let processor = Arc::new(StackProcessor::new(
            store.clone(),
            Arc::new(dispatcher),
            trigger.clone(),
            self.processor_config,
        ));
        let sweeper = Sweeper::new(store.clone(), self.sweeper_config);

        Ok(Engine {
            store,
            tasks,
            processor,
            sweeper,
            trigger,
        })
    }
}

/// Client-visible task run state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskStatusView {
    /// Current status string.
    pub status: String,
    /// Final result, when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Structured error, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Awaited stack run, when suspended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_on: Option<i64>,
}

impl TaskStatusView {
    fn from_record(record: &TaskRunRecord) -> Self {
        Self {
            status: record.status.clone(),
            result: record
                .result
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            error: record.error.as_deref().map(StepError::from_json),
            waiting_on: record.waiting_on_stack_run_id,
        }
    }
}

/// The assembled execution fabric.
pub struct Engine {
    store: Arc<dyn Persistence>,
    tasks: Arc<TaskRegistry>,
    processor: Arc<StackProcessor>,
    sweeper: Sweeper,
    trigger: Arc<dyn Trigger>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a new builder for configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Direct access to the durable store.
    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    /// Submit a task by name: inserts the task run plus its root code step
    /// and fires the cascade trigger.
    pub async fn submit(&self, task_name: &str, input: Value) -> Result<i64, CoreError> {
        if task_name.is_empty() {
            return Err(CoreError::ValidationError {
                field: "task_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if !self.tasks.contains(task_name) {
            return Err(CoreError::UnknownTask {
                task_name: task_name.to_string(),
            });
        }

        let input_json = serde_json::to_string(&input)?;
        let task_run_id = self.store.create_task_run(task_name, &input_json).await?;

        let args = serde_json::to_string(&vec![Value::String(task_name.to_string()), input])?;
        let root_id = self
            .store
            .create_stack_run(&NewStackRun {
                parent_task_run_id: task_run_id,
                parent_stack_run_id: None,
                service_name: CODE_SERVICE.to_string(),
                method_name: CODE_METHOD.to_string(),
                args,
            })
            .await?;

        info!(task_run_id, root_stack_run_id = root_id, task_name, "task submitted");
        self.trigger.fire();
        Ok(task_run_id)
    }

    /// Client-visible status of a task run.
    pub async fn task_status(&self, task_run_id: i64) -> Result<Option<TaskStatusView>, CoreError> {
        let record = self.store.get_task_run(task_run_id).await?;
        Ok(record.as_ref().map(TaskStatusView::from_record))
    }

    /// All steps of a chain, oldest first (diagnostics).
    pub async fn chain_steps(&self, task_run_id: i64) -> Result<Vec<StackRunRecord>, CoreError> {
        self.store.list_chain_stack_runs(task_run_id).await
    }

    /// Apply an externally-delivered result to a stack run and propagate
    /// it. Internal: invoked by the core (and trusted endpoints) only.
    pub async fn resume(&self, stack_run_id: i64, outcome: FrameOutcome) -> Result<(), CoreError> {
        self.processor
            .apply_external_result(stack_run_id, outcome)
            .await
    }

    /// One full worker round: a sweep pass, timeout propagation, then at
    /// most one processed step.
    pub async fn process_next(&self) -> Result<ProcessReport, CoreError> {
        let sweep = self.sweeper.sweep().await?;
        for (run, error) in &sweep.timed_out_steps {
            if run.parent_stack_run_id.is_some() {
                self.processor
                    .resume_parent(
                        run,
                        FrameOutcome::Err {
                            error: error.clone(),
                        },
                    )
                    .await?;
            }
        }
        self.processor.process_next().await
    }

    /// Drive processing rounds until the queue is drained. Returns how many
    /// steps were processed.
    pub async fn run_until_idle(&self) -> Result<u64, CoreError> {
        let mut processed = 0;
        loop {
            match self.process_next().await? {
                ProcessReport::Idle => return Ok(processed),
                ProcessReport::Processed { .. } => processed += 1,
            }
        }
    }

    /// Store health check.
    pub async fn health(&self) -> Result<bool, CoreError> {
        self.store.health_check_db().await
    }
}

/// Spawn the drain loop for an in-process [`ChannelTrigger`]: every nudge
/// drains the queue. Shuts down when the watch flips to true or the
/// trigger side is dropped.
///
/// [`ChannelTrigger`]: crate::trigger::ChannelTrigger
pub fn spawn_drain_loop(
    engine: Arc<Engine>,
    mut nudges: tokio::sync::mpsc::UnboundedReceiver<()>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("drain loop started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("drain loop received shutdown signal");
                        break;
                    }
                }

                nudge = nudges.recv() => {
                    match nudge {
                        Some(()) => {
                            match engine.run_until_idle().await {
                                Ok(processed) if processed > 0 => {
                                    debug!(processed, "drain round finished");
                                }
                                Ok(_) => {}
                                Err(e) => error!(error = %e, "drain round failed"),
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        info!("drain loop stopped");
    })
}
