// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared pieces for the runnable examples: an in-process "calculator"
//! endpoint standing in for a wrapped external service.

use async_trait::async_trait;
use serde_json::{Value, json};

use filament_core::StepError;
use filament_core::dispatch::{Endpoint, EndpointReply};

/// A tiny arithmetic service reachable as service name `calc`.
///
/// Methods:
/// - `add`: sums its numeric args
/// - `mul`: multiplies its numeric args
/// - `fail`: always returns a structured error
pub struct CalcEndpoint;

#[async_trait]
impl Endpoint for CalcEndpoint {
    async fn invoke(&self, method_path: &str, args: &[Value]) -> EndpointReply {
        let numbers: Vec<i64> = args.iter().filter_map(Value::as_i64).collect();
        match method_path {
            "add" => EndpointReply::Value(json!(numbers.iter().sum::<i64>())),
            "mul" => EndpointReply::Value(json!(numbers.iter().product::<i64>())),
            "fail" => EndpointReply::Error(StepError::external("calc/fail always fails")),
            other => EndpointReply::Error(StepError::external(format!(
                "calc has no method '{}'",
                other
            ))),
        }
    }
}

/// Initialize example logging.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}
