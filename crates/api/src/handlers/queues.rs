//! Diagnostic view over the per-queue load counters.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use batchforge_core::queue::{parse_queue_name, QueueName};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// One row of `GET /api/v1/queues`.
#[derive(Debug, Serialize)]
pub struct QueueLoadView {
    pub queue_name: QueueName,
    pub pending: i64,
    pub running: i64,
    pub total_load: i64,
}

/// Body of `POST /api/v1/queues/reset`. Omit `queue` to reset every queue.
#[derive(Debug, Default, Deserialize)]
pub struct ResetQueues {
    pub queue: Option<String>,
}

/// GET /api/v1/queues
pub async fn list_queues(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let snapshot = state.dispatcher.selector().snapshot_all().await?;
    let data: Vec<QueueLoadView> = snapshot
        .into_iter()
        .map(|(queue_name, load)| QueueLoadView {
            queue_name,
            pending: load.pending,
            running: load.running,
            total_load: load.total(),
        })
        .collect();
    Ok(Json(DataResponse { data }))
}

/// POST /api/v1/queues/reset
///
/// Administrative recovery for counters left high by crashed workers.
pub async fn reset_queues(
    State(state): State<AppState>,
    Json(input): Json<ResetQueues>,
) -> AppResult<impl IntoResponse> {
    let queue = input
        .queue
        .as_deref()
        .map(|raw| parse_queue_name(raw, state.dispatcher.config().queue_count))
        .transpose()?;

    state.dispatcher.selector().reset(queue.as_ref()).await?;
    tracing::info!(queue = ?queue.as_ref().map(QueueName::as_str), "Queue counters reset via API");

    Ok(StatusCode::NO_CONTENT)
}
