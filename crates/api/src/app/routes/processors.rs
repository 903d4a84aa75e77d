use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::{Value as JsonValue, json};

use eventhub_infra::EventService;

use crate::app::dto::{self, CreateProcessorRequest, SetEnabledRequest};
use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_processor).get(list_processors))
        .route("/:name/enabled", post(set_enabled))
}

/// POST /processors
///
/// The processor's `type` must have a bound handler, otherwise 400.
pub async fn create_processor(
    Extension(services): Extension<Arc<EventService>>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let req: CreateProcessorRequest = match dto::parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.create_processor(req.into_new_processor()).await {
        Ok(processor) => (StatusCode::CREATED, Json(processor)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /processors  (priority order)
pub async fn list_processors(
    Extension(services): Extension<Arc<EventService>>,
) -> axum::response::Response {
    let processors = services.list_processors().await;
    (StatusCode::OK, Json(json!({ "processors": processors }))).into_response()
}

/// POST /processors/:name/enabled  `{"enabled": false}`
pub async fn set_enabled(
    Extension(services): Extension<Arc<EventService>>,
    Path(name): Path<String>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let req: SetEnabledRequest = match dto::parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.set_processor_enabled(&name, req.enabled).await {
        Ok(processor) => (StatusCode::OK, Json(processor)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
