//! HTTP API: a thin axum surface over `EventService`.

pub mod app;
