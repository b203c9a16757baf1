use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use jobq_common::metrics::MetricsSnapshot;
use jobq_common::registry::Job;

use crate::api::{ApiError, CreateJobRequest, CreateJobResponse, HealthResponse};

use super::app::AppState;

/// Admit a job: register it and offer its id to the dispatch channel.
///
/// The body is parsed by hand rather than through the `Json` extractor so
/// that a missing field is a 400 like any other malformed input, and the
/// buffering rejection is caught so an over-limit body is a 413 with the
/// uniform JSON error shape. When the channel rejects the id, the
/// registration and its metric increment are rolled back before the
/// client sees the error.
pub async fn create(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    if state.admission.is_cancelled() {
        return Err(ApiError::ShuttingDown);
    }

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BodyRead(rejection.body_text())
        }
    })?;

    let request: CreateJobRequest = serde_json::from_slice(&body)?;
    if request.job_type.is_empty() {
        return Err(ApiError::MissingJobType);
    }

    let job = Job::new(request.job_type, request.payload);
    let response = CreateJobResponse {
        id: job.id,
        job_type: job.job_type.clone(),
        status: job.status,
        created_at: job.created_at,
    };

    state.registry.insert(job).map_err(|err| {
        error!(job_id = %response.id, %err, "failed to register job");
        ApiError::Registry(err)
    })?;
    state.metrics.inc_created();

    match state.dispatcher.try_send(response.id) {
        Ok(()) => {
            debug!(job_id = %response.id, job_type = %response.job_type, "job admitted");
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(send_error) => {
            if let Err(err) = state.registry.delete(&response.id) {
                error!(job_id = %response.id, %err, "failed to roll back admission");
            }
            state.metrics.dec_created();

            match send_error {
                TrySendError::Full(_) => {
                    warn!(job_id = %response.id, "dispatch channel full, admission rejected");
                    Err(ApiError::QueueFull)
                }
                // The channel only closes once shutdown is underway.
                TrySendError::Closed(_) => Err(ApiError::ShuttingDown),
            }
        }
    }
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.registry.list())
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
    })
}
