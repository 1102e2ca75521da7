//! Error types for mhd-pipeline
//!
//! `PipelineError` covers every way a pipeline step can fail; the job runner
//! records its `Display` form as the job error and its `Debug` form as the
//! traceback. `ApiError` maps failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Pipeline step failure
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Quality gate rejected the training frame
    #[error("Data quality failed: {}", issues.join("; "))]
    DataQuality { issues: Vec<String> },

    /// Not enough rows (or no rows) to train or score
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Target has a single class where two are required
    #[error("Degenerate target: {0}")]
    DegenerateTarget(String),

    /// Required column absent from a frame
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// Cell content unusable for the requested operation
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Tracking server call failed
    #[error("Tracking server error: {0}")]
    Tracking(String),

    /// Model registry call failed
    #[error("Model registry error: {0}")]
    Registry(String),

    /// Model artifact missing or unreadable
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// No deployed model resolvable at serving time
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Job queue full or shut down
    #[error("Job queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error(transparent)]
    Common(#[from] mhd_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No deployed model (503)
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::ModelUnavailable(msg) => ApiError::ModelUnavailable(msg),
            PipelineError::DataQuality { .. }
            | PipelineError::InsufficientData(_)
            | PipelineError::DegenerateTarget(_)
            | PipelineError::MissingColumn(_)
            | PipelineError::InvalidData(_)
            | PipelineError::Csv(_) => ApiError::BadRequest(err.to_string()),
            PipelineError::QueueUnavailable(msg) => ApiError::Conflict(msg),
            PipelineError::Common(common) => common.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<mhd_common::Error> for ApiError {
    fn from(err: mhd_common::Error) -> Self {
        match err {
            mhd_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            mhd_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("Database error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::ModelUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "MODEL_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
