use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when either store is unreachable.
    pub status: &'static str,
    pub version: &'static str,
    pub store_healthy: bool,
    /// Queues with a readable load counter.
    pub queue_count: usize,
    /// Units waiting or running across every queue.
    pub total_load: i64,
}

/// GET /health
///
/// Answers 503 while degraded so a load balancer stops routing
/// submissions to an instance that cannot admit them.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_healthy = state.dispatcher.store_healthy().await;
    let snapshot = match state.dispatcher.selector().snapshot_all().await {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(error = %e, "Queue load snapshot failed");
            None
        }
    };

    let healthy = store_healthy && snapshot.is_some();
    let (queue_count, total_load) = snapshot.map_or((0, 0), |snapshot| {
        (snapshot.len(), snapshot.values().map(|load| load.total()).sum())
    });

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            store_healthy,
            queue_count,
            total_load,
        }),
    )
}

/// Mounted at the root, outside `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
