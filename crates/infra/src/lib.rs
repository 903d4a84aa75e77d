//! Infrastructure layer: ledger, pipeline, projections, delivery, replay and
//! the `EventService` facade that wires them.

pub mod config;
pub mod db;
pub mod ledger;
pub mod metadata;
pub mod pipeline;
pub mod projections;
pub mod replay;
pub mod service;
pub mod subscriptions;


pub use config::{ConfigError, PipelineConfig, ServiceConfig};
pub use replay::{ReplayRequest, ReplaySelector, ReplaySummary, ReplayTarget};
pub use service::{EventService, EventServiceBuilder, ServiceError, StreamView};
