use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use batchforge_core::dispatcher::DispatchError;
use batchforge_core::error::{CoreError, StoreError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain, admission and storage errors. Implements
/// [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `batchforge_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Job admission or submission failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A storage port failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type ErrorParts = (StatusCode, &'static str, String);

fn internal(err: &dyn std::fmt::Display, context: &str) -> ErrorParts {
    tracing::error!(error = %err, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
            },

            // --- Admission errors ---
            AppError::Dispatch(dispatch) => match dispatch {
                DispatchError::TooManyActiveJobs { .. } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "TOO_MANY_ACTIVE_JOBS",
                    dispatch.to_string(),
                ),
                DispatchError::NoUnitsToGenerate => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "NO_UNITS_TO_GENERATE",
                    dispatch.to_string(),
                ),
                DispatchError::InvalidRequest(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                DispatchError::TargetBusy { .. } => {
                    (StatusCode::CONFLICT, "TARGET_BUSY", dispatch.to_string())
                }
                DispatchError::Submission { .. } => internal(dispatch, "Unit submission failed"),
                DispatchError::Store(err) => classify_store_error(err),
            },

            // --- Storage errors ---
            AppError::Store(err) => classify_store_error(err),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a storage error into an HTTP status, error code, and message.
///
/// - `NotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_store_error(err: &StoreError) -> ErrorParts {
    match err {
        StoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        StoreError::Conflict { constraint } if constraint.starts_with("uq_") => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Duplicate value violates unique constraint: {constraint}"),
        ),
        other => internal(other, "Storage error"),
    }
}
