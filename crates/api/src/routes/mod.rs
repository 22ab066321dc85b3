pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                  submit (POST)
/// /jobs/{job_id}         poll (GET)
/// /queues                counter snapshot (GET)
/// /queues/reset          zero counters (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(handlers::jobs::submit_job))
        .route("/jobs/{job_id}", get(handlers::jobs::get_job))
        .route("/queues", get(handlers::queues::list_queues))
        .route("/queues/reset", post(handlers::queues::reset_queues))
}
