// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External call endpoints.
//!
//! Each wrapped service is a named endpoint accepting a JSON-encoded
//! argument vector. The core records method paths verbatim and makes no
//! assumption about the endpoint's internal shape.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::StepError;

/// Key of the distinguished response that signals "this endpoint's
/// processing itself suspended"; the value is the awaited stack run id.
pub const SUSPENDED_KEY: &str = "__suspended__";

/// What an endpoint invocation produced.
#[derive(Debug)]
pub enum EndpointReply {
    /// JSON value on success.
    Value(Value),
    /// The endpoint's processing suspended; the step must wait on this
    /// stack run.
    Suspended(i64),
    /// Structured or transport failure.
    Error(StepError),
}

/// A named callable endpoint.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Perform the call with the recorded args.
    async fn invoke(&self, method_path: &str, args: &[Value]) -> EndpointReply;
}

/// HTTP endpoint: POSTs the argument vector to `base_url` joined with the
/// verbatim method path.
pub struct HttpEndpoint {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpEndpoint {
    /// Create an endpoint with the given outbound call timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn url_for(&self, method_path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            method_path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Endpoint for HttpEndpoint {
    async fn invoke(&self, method_path: &str, args: &[Value]) -> EndpointReply {
        let url = self.url_for(method_path);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(args)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return EndpointReply::Error(StepError::transport(format!(
                    "call to {} timed out after {:?}",
                    url, self.timeout
                )));
            }
            Err(e) => {
                return EndpointReply::Error(StepError::transport(format!(
                    "call to {} failed: {}",
                    url, e
                )));
            }
        };

        let status = response.status();
        let body: Result<Value, _> = response.json().await;

        if !status.is_success() {
            let mut error =
                StepError::external(format!("{} responded with status {}", url, status));
            if let Ok(details) = body {
                error = error.with_details(details);
            }
            return EndpointReply::Error(error);
        }

        match body {
            Ok(value) => classify_success(value),
            Err(e) => EndpointReply::Error(StepError::external(format!(
                "{} returned a non-JSON body: {}",
                url, e
            ))),
        }
    }
}

/// Success bodies are passed through byte-transparently, except for the
/// distinguished suspension signal.
pub fn classify_success(value: Value) -> EndpointReply {
    if let Some(marker) = value.get(SUSPENDED_KEY) {
        let id = marker
            .as_i64()
            .or_else(|| marker.as_str().and_then(|s| s.parse().ok()));
        return match id {
            Some(id) => EndpointReply::Suspended(id),
            None => EndpointReply::Error(StepError::external(format!(
                "malformed suspension signal: {}",
                marker
            ))),
        };
    }
    EndpointReply::Value(value)
}

/// Declarative result shaping: wraps raw-array responses of known list
/// operations into the object shape task code expects. The only place
/// result reshaping is permitted.
#[derive(Debug, Clone)]
pub struct ShapeRule {
    /// Service the rule applies to.
    pub service_name: String,
    /// Method path suffix that marks a list operation.
    pub method_suffix: String,
    /// Key the raw array is wrapped under.
    pub wrap_key: String,
}

/// Rule table applied to successful external results.
#[derive(Debug, Clone, Default)]
pub struct ResultShaper {
    rules: Vec<ShapeRule>,
}

impl ResultShaper {
    /// Build a shaper from a rule table.
    pub fn new(rules: Vec<ShapeRule>) -> Self {
        Self { rules }
    }

    /// Wrap `value` when a rule matches and the value is a raw array;
    /// everything else passes through unchanged.
    pub fn shape(&self, service_name: &str, method_path: &str, value: Value) -> Value {
        if !value.is_array() {
            return value;
        }
        for rule in &self.rules {
            if rule.service_name == service_name && method_path.ends_with(&rule.method_suffix) {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(rule.wrap_key.clone(), value);
                return Value::Object(wrapped);
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_plain_value() {
        match classify_success(json!({"answer": 41})) {
            EndpointReply::Value(v) => assert_eq!(v, json!({"answer": 41})),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_suspension_signal() {
        match classify_success(json!({SUSPENDED_KEY: 17})) {
            EndpointReply::Suspended(id) => assert_eq!(id, 17),
            other => panic!("expected suspension, got {:?}", other),
        }
        match classify_success(json!({SUSPENDED_KEY: "23"})) {
            EndpointReply::Suspended(id) => assert_eq!(id, 23),
            other => panic!("expected suspension, got {:?}", other),
        }
        match classify_success(json!({SUSPENDED_KEY: true})) {
            EndpointReply::Error(e) => assert!(e.message.contains("malformed")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_url_join() {
        let endpoint = HttpEndpoint::new("http://svc:9000/api/", Duration::from_secs(30));
        assert_eq!(endpoint.url_for("/v1/search"), "http://svc:9000/api/v1/search");
        assert_eq!(endpoint.url_for("v1/search"), "http://svc:9000/api/v1/search");
    }

    #[test]
    fn test_shaper_wraps_matching_arrays_only() {
        let shaper = ResultShaper::new(vec![ShapeRule {
            service_name: "registry".to_string(),
            method_suffix: "/list".to_string(),
            wrap_key: "domains".to_string(),
        }]);

        let wrapped = shaper.shape("registry", "domains/list", json!(["a", "b"]));
        assert_eq!(wrapped, json!({"domains": ["a", "b"]}));

        // Non-array values and non-matching calls pass through.
        let untouched = shaper.shape("registry", "domains/list", json!({"x": 1}));
        assert_eq!(untouched, json!({"x": 1}));
        let untouched = shaper.shape("registry", "domains/get", json!(["a"]));
        assert_eq!(untouched, json!(["a"]));
        let untouched = shaper.shape("other", "domains/list", json!(["a"]));
        assert_eq!(untouched, json!(["a"]));
    }
}
