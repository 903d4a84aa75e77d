//! Ingestion and event inspection.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value as JsonValue, json};

use eventhub_events::NewEvent;
use eventhub_infra::EventService;

use crate::app::dto::{self, EventListQuery};
use crate::app::errors;

/// Upper bound on one batch request.
const MAX_BATCH: usize = 1000;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_event).get(list_events))
        .route("/batch", post(create_batch))
        .route("/:event_id", get(get_event))
        .route("/:event_id/results", get(get_results))
}

/// POST /events
///
/// Acknowledges the ledger append only; processing happens on the pipeline.
pub async fn create_event(
    Extension(services): Extension<Arc<EventService>>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let event: NewEvent = match dto::parse_body(body) {
        Ok(e) => e,
        Err(resp) => return resp,
    };

    match services.create(event).await {
        Ok(stored) => (
            StatusCode::CREATED,
            Json(json!({
                "event_id": stored.event_id,
                "status": stored.status,
                "sequence_timestamp": stored.sequence_timestamp,
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /events/batch
///
/// Body: `{"events": [...]}`. Items are appended independently; the response
/// lists one result per item, in request order.
pub async fn create_batch(
    Extension(services): Extension<Arc<EventService>>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let Some(items) = body.get("events").and_then(JsonValue::as_array).cloned() else {
        return errors::bad_request("body must be {\"events\": [...]}");
    };
    if items.len() > MAX_BATCH {
        return errors::bad_request(format!("at most {MAX_BATCH} events per batch"));
    }

    let mut results = vec![JsonValue::Null; items.len()];
    let mut valid = Vec::new();
    let mut positions = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<NewEvent>(item) {
            Ok(event) => {
                valid.push(event);
                positions.push(index);
            }
            Err(e) => {
                results[index] = json!({
                    "index": index,
                    "error": "validation_error",
                    "message": format!("invalid event: {e}"),
                });
            }
        }
    }

    for (index, outcome) in positions.into_iter().zip(services.create_batch(valid).await) {
        results[index] = match outcome {
            Ok(stored) => json!({ "index": index, "event_id": stored.event_id }),
            Err(e) => json!({
                "index": index,
                "error": error_code(&e),
                "message": e.to_string(),
            }),
        };
    }

    let accepted = results.iter().filter(|r| r.get("event_id").is_some()).count();
    (
        StatusCode::OK,
        Json(json!({
            "accepted": accepted,
            "rejected": results.len() - accepted,
            "results": results,
        })),
    )
        .into_response()
}

fn error_code(err: &eventhub_infra::ServiceError) -> &'static str {
    use eventhub_infra::ServiceError;
    match err {
        ServiceError::Validation(_) => "validation_error",
        ServiceError::NotFound(_) => "not_found",
        ServiceError::Conflict(_) => "conflict",
        ServiceError::StorageUnavailable(_) => "storage_unavailable",
    }
}

/// GET /events?entity_id=X&event_type=Y&status=failed&limit=50&offset=0
///
/// Newest first. `limit` defaults to 50 and is capped at 1000.
pub async fn list_events(
    Extension(services): Extension<Arc<EventService>>,
    Query(query): Query<EventListQuery>,
) -> axum::response::Response {
    let (filter, pagination) = match query.into_filter() {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match services.query(&filter, pagination).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /events/:event_id
pub async fn get_event(
    Extension(services): Extension<Arc<EventService>>,
    Path(event_id): Path<String>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&event_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.get(event_id).await {
        Ok(event) => (StatusCode::OK, Json(event)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /events/:event_id/results
///
/// The processing audit trail, oldest first. Replay rows carry `replay: true`.
pub async fn get_results(
    Extension(services): Extension<Arc<EventService>>,
    Path(event_id): Path<String>,
) -> axum::response::Response {
    let event_id = match dto::parse_event_id(&event_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.results(event_id).await {
        Ok(results) => (
            StatusCode::OK,
            Json(json!({ "event_id": event_id, "results": results })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
