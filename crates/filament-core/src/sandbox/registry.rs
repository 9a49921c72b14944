// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task registry: named task functions executed by the sandbox.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::context::{TaskContext, TaskInterrupt};

/// A registered task function.
///
/// Task code is deterministic up to its external calls: the function is
/// re-entered from the top on every resume, with `call_host_tool` feeding
/// back the recorded results in order. `call_host_tool` is the only durable
/// side-effect seam.
pub type TaskFn = dyn Fn(&mut TaskContext, Value) -> Result<Value, TaskInterrupt> + Send + Sync;

/// Lookup table from task name to task function.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskFn>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task function under a name. A later registration under
    /// the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Fn(&mut TaskContext, Value) -> Result<Value, TaskInterrupt> + Send + Sync + 'static,
    {
        self.tasks.insert(name.into(), Arc::new(task));
    }

    /// Look up a task by name.
    pub fn get(&self, name: &str) -> Option<Arc<TaskFn>> {
        self.tasks.get(name).cloned()
    }

    /// Is a task registered under this name?
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}
