use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value as JsonValue, json};

use eventhub_infra::EventService;

use crate::app::dto::{self, CreateSubscriptionRequest, SetEnabledRequest};
use crate::app::errors;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_subscription).get(list_subscriptions))
        .route("/:name", get(get_subscription).delete(delete_subscription))
        .route("/:name/enabled", post(set_enabled))
        .route("/:name/deliveries", get(list_deliveries))
}

/// POST /subscriptions
pub async fn create_subscription(
    Extension(services): Extension<Arc<EventService>>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let req: CreateSubscriptionRequest = match dto::parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services
        .create_subscription(req.subscriber_name, req.filters, req.target)
        .await
    {
        Ok(subscription) => (StatusCode::CREATED, Json(subscription)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /subscriptions
pub async fn list_subscriptions(
    Extension(services): Extension<Arc<EventService>>,
) -> axum::response::Response {
    let subscriptions = services.list_subscriptions().await;
    (
        StatusCode::OK,
        Json(json!({ "subscriptions": subscriptions })),
    )
        .into_response()
}

/// GET /subscriptions/:name
pub async fn get_subscription(
    Extension(services): Extension<Arc<EventService>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match services.get_subscription(&name).await {
        Ok(subscription) => (StatusCode::OK, Json(subscription)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// DELETE /subscriptions/:name
pub async fn delete_subscription(
    Extension(services): Extension<Arc<EventService>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match services.delete_subscription(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /subscriptions/:name/enabled  `{"enabled": false}`
pub async fn set_enabled(
    Extension(services): Extension<Arc<EventService>>,
    Path(name): Path<String>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let req: SetEnabledRequest = match dto::parse_body(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.set_subscription_enabled(&name, req.enabled).await {
        Ok(subscription) => (StatusCode::OK, Json(subscription)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /subscriptions/:name/deliveries
pub async fn list_deliveries(
    Extension(services): Extension<Arc<EventService>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match services.deliveries(&name).await {
        Ok(attempts) => (
            StatusCode::OK,
            Json(json!({ "subscriber_name": name, "deliveries": attempts })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
