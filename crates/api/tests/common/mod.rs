#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use batchforge_api::config::ServerConfig;
use batchforge_api::router::build_app_router;
use batchforge_api::state::AppState;
use batchforge_core::config::SchedulerConfig;
use batchforge_core::dispatcher::JobDispatcher;
use batchforge_core::memory::{MemoryJobStore, MemoryQueueLoadStore, MemoryTaskQueue};

pub const TEST_ORIGIN: &str = "http://localhost:5173";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

/// Handles to the in-memory stores behind a test app.
pub struct TestStores {
    pub jobs: Arc<MemoryJobStore>,
    pub tasks: Arc<MemoryTaskQueue>,
    pub loads: Arc<MemoryQueueLoadStore>,
}

/// Build the full application router over in-memory stores.
///
/// Uses the same router builder as `main.rs`, so tests exercise the
/// production middleware stack.
pub fn build_test_app() -> (Router, TestStores) {
    let scheduler = SchedulerConfig {
        queue_count: 4,
        ..Default::default()
    };
    let stores = TestStores {
        jobs: Arc::new(MemoryJobStore::new()),
        tasks: Arc::new(MemoryTaskQueue::new()),
        loads: Arc::new(MemoryQueueLoadStore::new(&scheduler.queues())),
    };
    let dispatcher = JobDispatcher::new(
        stores.jobs.clone(),
        stores.tasks.clone(),
        stores.loads.clone(),
        scheduler,
    );

    let config = test_config();
    let state = AppState {
        config: Arc::new(config.clone()),
        dispatcher,
    };
    (build_app_router(state, &config), stores)
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
