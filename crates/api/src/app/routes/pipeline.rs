use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use eventhub_infra::EventService;

use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/run", post(run_cycle))
        .route("/stats", get(stats))
}

/// POST /pipeline/run
///
/// Runs one cycle inline. Cycles are serialized, so this waits behind a
/// background cycle already in flight.
pub async fn run_cycle(
    Extension(services): Extension<Arc<EventService>>,
) -> axum::response::Response {
    match services.run_pipeline_cycle().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /pipeline/stats
pub async fn stats(Extension(services): Extension<Arc<EventService>>) -> axum::response::Response {
    (StatusCode::OK, Json(services.pipeline_stats())).into_response()
}
