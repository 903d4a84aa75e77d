use axum::Router;

pub mod events;
pub mod pipeline;
pub mod processors;
pub mod projections;
pub mod replay;
pub mod streams;
pub mod subscriptions;
pub mod system;

/// Router for every service endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/events", events::router())
        .nest("/streams", streams::router())
        .nest("/projections", projections::router())
        .nest("/subscriptions", subscriptions::router())
        .nest("/processors", processors::router())
        .nest("/replay", replay::router())
        .nest("/pipeline", pipeline::router())
}
