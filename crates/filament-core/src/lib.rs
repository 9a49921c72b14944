// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filament Core - Durable Task Execution Fabric
//!
//! This crate provides the execution engine for long-running, externally
//! blocked workflows. A task is registered code that may invoke external
//! services; every such invocation becomes a persistent, resumable step (a
//! *stack run*), processed out-of-band and fed back into the task through a
//! replay log. State lives in PostgreSQL or SQLite for crash resilience.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        External Clients                        │
//! │                  (submit / status / resume)                    │
//! └────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        filament-server                         │
//! │          HTTP ingress + self-trigger cascade endpoint          │
//! └────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────┐              ┌─────────────────────────┐
//! │    Stack Processor    │─────────────►│    Service Dispatcher   │
//! │ selection, chain lock │              │  code step → sandbox    │
//! │ FIFO, resume, sweep   │              │  external step → HTTP   │
//! └───────────────────────┘              └─────────────────────────┘
//!             │
//!             ▼
//! ┌───────────────────────┐
//! │     Durable Store     │
//! │ task_runs, stack_runs,│
//! │      task_locks       │
//! └───────────────────────┘
//! ```
//!
//! # Stack run state machine
//!
//! ```text
//!      ┌─────────┐
//!      │ PENDING │◄────────────── submission / continuation capture
//!      └────┬────┘
//!           │ claimed by a worker
//!           ▼
//!   ┌────────────┐   call_host_tool   ┌─────────────────────────┐
//!   │ PROCESSING │───────────────────►│ SUSPENDED_WAITING_CHILD │
//!   └─────┬──────┘                    └───────────┬─────────────┘
//!         │                                       │ awaited child terminal
//!         │                                       ▼
//!         │                              ┌────────────────┐
//!         │◄─────────────────────────────│ PENDING_RESUME │
//!         │         re-entered           └────────────────┘
//!         │
//!    complete / fail
//!         │
//!         ▼
//!  ┌───────────┐   ┌────────┐
//!  │ COMPLETED │   │ FAILED │
//!  └───────────┘   └────────┘
//! ```
//!
//! Within a chain (all steps of one task run) progress is serial and FIFO;
//! independent chains advance concurrently under per-chain locks. After
//! every terminal transition a best-effort cascade trigger keeps the queue
//! draining without a polling loop, and a sweeper pass on every trigger
//! reclaims stale locks and stuck steps.
//!
//! # Modules
//!
//! - [`capture`]: durable recording of suspensions (child insert + wait edge)
//! - [`config`]: engine configuration from environment variables
//! - [`dispatch`]: endpoint registry, outbound calls, outcome classification
//! - [`error`]: core error type with stable error-code strings
//! - [`model`]: statuses, structured step errors, the replay log
//! - [`persistence`]: store trait plus SQLite and PostgreSQL backends
//! - [`processor`]: step selection, chain locks, outcome interpretation
//! - [`runtime`]: the embeddable [`Engine`](runtime::Engine)
//! - [`sandbox`]: replay-based execution of registered task code
//! - [`sweeper`]: stale lock and stuck step reclamation
//! - [`trigger`]: the cascade trigger (HTTP, channel, null)

#![deny(missing_docs)]

/// Continuation capture: durable recording of suspensions.
pub mod capture;

/// Engine configuration from environment variables.
pub mod config;

/// Service dispatcher and endpoint registry.
pub mod dispatch;

/// Error types for core operations.
pub mod error;

/// Shared domain types: statuses, step errors, replay log.
pub mod model;

/// Durable store trait and backends.
pub mod persistence;

/// The stack run processor.
pub mod processor;

/// Resumption path (implemented on the processor).
mod resume;

/// The embeddable engine.
pub mod runtime;

/// Task sandbox, context and registry.
pub mod sandbox;

/// Lock and recovery sweeper.
pub mod sweeper;

/// Cascade trigger implementations.
pub mod trigger;

pub use config::Config;
pub use error::CoreError;
pub use model::{
    CODE_METHOD, CODE_SERVICE, ErrorKind, FrameOutcome, ReplayFrame, StackRunStatus, StepError,
    SuspensionDescriptor, TaskRunStatus, VmState,
};
pub use runtime::{Engine, EngineBuilder, TaskStatusView};
pub use sandbox::{TaskContext, TaskInterrupt, TaskRegistry};
