use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::{routing, BoxError, Router};
use tokio_util::sync::CancellationToken;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use jobq_common::metrics::MetricsRegistry;
use jobq_common::registry::JobRegistry;

use crate::api::ApiError;
use crate::dispatch::JobSender;

use super::jobs;

/// Dependencies shared by all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub dispatcher: JobSender,
    /// Cancelled when shutdown begins; admissions then return 503.
    pub admission: CancellationToken,
}

pub fn router(state: AppState, max_body_size: usize, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/health", routing::get(jobs::health))
        .route("/metrics", routing::get(jobs::metrics))
        .route(
            "/jobs",
            routing::post(jobs::create)
                .get(jobs::list)
                .layer(RequestBodyLimitLayer::new(max_body_size)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Convert middleware failures into the uniform JSON error shape; without
/// this, a timed-out request would surface as a bare tower error.
async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::RequestTimeout
    } else {
        ApiError::Internal(err.to_string())
    }
}

pub async fn index() -> &'static str {
    "jobq api"
}
