use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use uuid::Uuid;

use jobq_common::registry::{JobStatus, RegistryError};

/// The body of a request made to create a job.
///
/// The payload is captured as raw JSON so the stored bytes are exactly
/// what the client sent.
#[derive(Deserialize, Serialize, Debug)]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Box<RawValue>,
}

/// The trimmed job view returned from a successful admission.
#[derive(Serialize, Deserialize, Debug)]
pub struct CreateJobResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to parse request: {0}")]
    RequestParsing(#[from] serde_json::Error),
    #[error("failed to read request body: {0}")]
    BodyRead(String),
    #[error("job submitted with an empty type")]
    MissingJobType,
    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,
    #[error("request timed out")]
    RequestTimeout,
    #[error("job queue is full, try again later")]
    QueueFull,
    #[error("service is shutting down")]
    ShuttingDown,
    #[error("registry failure: {0}")]
    Registry(#[from] RegistryError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::RequestParsing(_) | ApiError::BodyRead(_) | ApiError::MissingJobType => {
                StatusCode::BAD_REQUEST
            }
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Registry(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
