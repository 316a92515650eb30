//! Error types for cgpt-api
//!
//! Every handler error renders as `{"error": {"code": ..., "message": ...}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A run is already in progress (409)
    #[error("Analysis already running for channel {0}")]
    AnalysisRunning(String),

    /// Cancel requested with nothing running (409)
    #[error("No analysis is running")]
    NoActiveRun,

    /// Work directory access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::AnalysisRunning(_) => (StatusCode::CONFLICT, "ANALYSIS_RUNNING"),
            ApiError::NoActiveRun => (StatusCode::CONFLICT, "NO_ACTIVE_RUN"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
