// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for the ingress surface over an embedded SQLite engine.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use filament_core::persistence::SqlitePersistence;
use filament_core::runtime::Engine;
use filament_core::trigger::TRIGGER_SECRET_HEADER;
use filament_server::{AppState, http};

struct TestServer {
    router: Router,
    _dir: tempfile::TempDir,
}

impl TestServer {
    async fn new(secret: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(
            SqlitePersistence::from_path(dir.path().join("ingress.db"))
                .await
                .expect("store"),
        );
        let engine = Arc::new(
            Engine::builder()
                .persistence(store)
                .register_task("echo", |_task, input| Ok(input))
                .build()
                .expect("engine"),
        );
        let state = Arc::new(AppState::new(engine, secret));
        Self {
            router: http::create_router(state),
            _dir: dir,
        }
    }

    async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn post(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

#[tokio::test]
async fn test_submit_poll_and_drain() {
    let server = TestServer::new("").await;

    let (status, body) = server
        .request(TestServer::post(
            "/v1/tasks",
            json!({"task_name": "echo", "input": {"k": 1}}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_run_id = body["task_run_id"].as_i64().expect("task run id");

    let (status, body) = server
        .request(
            Request::builder()
                .uri(format!("/v1/tasks/{}", task_run_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");

    // One trigger completes the trivial task.
    let (status, body) = server
        .request(TestServer::post("/internal/process-next", json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], true);
    assert_eq!(body["terminal"], true);

    let (_, body) = server
        .request(
            Request::builder()
                .uri(format!("/v1/tasks/{}", task_run_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"], json!({"k": 1}));
}

#[tokio::test]
async fn test_submission_validation() {
    let server = TestServer::new("").await;

    let (status, body) = server
        .request(TestServer::post(
            "/v1/tasks",
            json!({"task_name": "ghost"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNKNOWN_TASK");

    let (status, body) = server
        .request(TestServer::post("/v1/tasks", json!({"task_name": ""})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = server
        .request(
            Request::builder()
                .uri("/v1/tasks/999")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TASK_RUN_NOT_FOUND");
}

#[tokio::test]
async fn test_internal_routes_require_secret() {
    let server = TestServer::new("hunter2").await;

    let (status, _) = server
        .request(TestServer::post("/internal/process-next", json!({})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/internal/process-next")
        .header(header::CONTENT_TYPE, "application/json")
        .header(TRIGGER_SECRET_HEADER, "hunter2")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = server.request(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], false);
}

#[tokio::test]
async fn test_resume_requires_exactly_one_outcome() {
    let server = TestServer::new("").await;

    let (status, body) = server
        .request(TestServer::post(
            "/internal/resume",
            json!({"stack_run_id": 1}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = server
        .request(TestServer::post(
            "/internal/resume",
            json!({"stack_run_id": 12345, "result": 1}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "STACK_RUN_NOT_FOUND");
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::new("").await;
    let (status, body) = server
        .request(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
}
