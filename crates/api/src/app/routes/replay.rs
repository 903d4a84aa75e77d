use std::sync::Arc;

use axum::{
    Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::post,
};
use serde_json::Value as JsonValue;

use eventhub_infra::{EventService, ReplayRequest};

use crate::app::dto;
use crate::app::errors;

pub fn router() -> Router {
    Router::new().route("/", post(replay))
}

/// POST /replay
///
/// Body example:
/// `{"selector": {"kind": "stream", "stream_id": "order:42"}, "target": {"kind": "all"}, "dry_run": true}`
pub async fn replay(
    Extension(services): Extension<Arc<EventService>>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let request: ReplayRequest = match dto::parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.replay(&request).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
