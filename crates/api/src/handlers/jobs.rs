//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use batchforge_core::dispatcher::JobRequest;
use batchforge_core::error::CoreError;
use batchforge_core::types::JobId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/jobs
///
/// Admit and enqueue a bulk request. Returns 201 as soon as every unit is
/// queued; progress is read back through [`get_job`].
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<JobRequest>,
) -> AppResult<impl IntoResponse> {
    let receipt = state.dispatcher.submit(&input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state
        .dispatcher
        .poll(job_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
        })?;
    Ok(Json(DataResponse { data: snapshot }))
}
