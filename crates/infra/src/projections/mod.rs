//! Projection engine: per-entity read models folded from the ledger.
//!
//! Projections are rebuildable from an entity's stream and idempotent under
//! redelivery, which makes them safe for at-least-once dispatch.

pub mod engine;
pub mod folds;
pub mod postgres;
pub mod processor;
pub mod store;

pub use engine::{ApplyOutcome, FoldOutcome, ProjectionEngine};
pub use folds::{ACTIVITY, ActivityFold, CURRENT_STATE, CurrentStateFold};
pub use postgres::PostgresProjectionStore;
pub use processor::{PROJECTION_PROCESSOR, ProjectionProcessor};
pub use store::{InMemoryProjectionStore, ProjectionError, ProjectionStore};
