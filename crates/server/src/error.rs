// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jobwatch_core::JobError;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Missing or invalid bearer token")]
    Unauthenticated,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Job(err) => job_error_response(err),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("Authentication required"),
            ),
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

fn job_error_response(err: &JobError) -> (StatusCode, ErrorResponse) {
    match err {
        JobError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
        ),
        JobError::Unauthorized { job_id, requester } => {
            tracing::info!(job_id = %job_id, requester = %requester, "Cancel refused for non-owner");
            (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("Not permitted to cancel this job"),
            )
        }
        JobError::InvalidTransition { .. }
        | JobError::InvalidProgress { .. }
        | JobError::AlreadyTerminal { .. } => {
            tracing::warn!(error = %err, "Conflicting job state");
            (
                StatusCode::CONFLICT,
                ErrorResponse::with_details("Conflict", err.to_string()),
            )
        }
        JobError::Contention { job_id, attempts } => {
            tracing::warn!(job_id = %job_id, attempts, "Job store contention");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("Job is busy, retry later"),
            )
        }
        JobError::StoreUnavailable(store_err) => {
            // Backend detail stays in the log.
            tracing::error!(error = %store_err, "Job store unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Job store unavailable"),
            )
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
