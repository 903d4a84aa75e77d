use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use eventhub_events::StreamId;
use eventhub_infra::EventService;

use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/:entity_type/:entity_id", get(list_projections))
        .route("/:entity_type/:entity_id/rebuild", post(rebuild_projections))
        .route("/:entity_type/:entity_id/:name", get(get_projection))
}

/// GET /projections/:entity_type/:entity_id
pub async fn list_projections(
    Extension(services): Extension<Arc<EventService>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> axum::response::Response {
    match services.list_projections(&entity_type, &entity_id).await {
        Ok(projections) => (
            StatusCode::OK,
            Json(json!({
                "entity_type": entity_type,
                "entity_id": entity_id,
                "projections": projections,
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /projections/:entity_type/:entity_id/:name
pub async fn get_projection(
    Extension(services): Extension<Arc<EventService>>,
    Path((entity_type, entity_id, name)): Path<(String, String, String)>,
) -> axum::response::Response {
    match services.get_projection(&entity_type, &entity_id, &name).await {
        Ok(projection) => (StatusCode::OK, Json(projection)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /projections/:entity_type/:entity_id/rebuild
pub async fn rebuild_projections(
    Extension(services): Extension<Arc<EventService>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> axum::response::Response {
    let stream_id = StreamId::new(entity_type, entity_id);
    match services.rebuild_projections(&stream_id).await {
        Ok(projections) => (
            StatusCode::OK,
            Json(json!({ "stream_id": stream_id, "projections": projections })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
