use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use eventhub_events::StreamId;
use eventhub_infra::EventService;

use crate::app::errors;

pub fn router() -> Router {
    Router::new().route("/:stream_id", get(get_stream))
}

/// GET /streams/:stream_id  (`entity_type:entity_id`)
pub async fn get_stream(
    Extension(services): Extension<Arc<EventService>>,
    Path(stream_id): Path<String>,
) -> axum::response::Response {
    let stream_id = match stream_id.parse::<StreamId>() {
        Ok(id) => id,
        Err(e) => return errors::bad_request(e.to_string()),
    };

    match services.get_stream(&stream_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
