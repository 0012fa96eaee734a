use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use sdapi_core::error::CoreError;
use sdapi_db::StoreError;
use sdapi_worker::SchedulerError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds store, scheduler, and
/// HTTP-specific variants. Implements [`IntoResponse`] to produce consistent
/// JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { job_type, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("No {job_type} job with id {id}"),
                ),
                CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
                CoreError::UnsupportedMedia(msg) => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED_MEDIA_TYPE", msg.clone())
                }
                CoreError::Internal(msg) => internal(msg),
            },

            AppError::Store(err) => classify_store_error(err),
            AppError::Scheduler(SchedulerError::Store(err)) => classify_store_error(err),
            AppError::Scheduler(SchedulerError::Closed) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                "The server is shutting down".to_string(),
            ),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal(msg: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %msg, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Map a store error to an HTTP status, error code, and message.
///
/// Lifecycle violations reaching a handler are bugs, so everything except
/// existence checks becomes a sanitized 500.
fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound { key } => (StatusCode::NOT_FOUND, "NOT_FOUND", format!("No job {key}")),
        StoreError::AlreadyExists { key } => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job {key} already exists"),
        ),
        other => internal(&other.to_string()),
    }
}
