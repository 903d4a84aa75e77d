//! Folds events into per-entity projections.
//!
//! For each registered fold the engine loads (or creates) the row for the
//! event's entity and:
//! - skips if `last_event_id` already is this event (redelivery),
//! - rejects with a warning if the event sorts before the last applied one,
//! - otherwise folds, bumps `version` and records the event as last applied.
//!
//! Writes are serialized so concurrent pipeline and replay dispatch cannot
//! interleave a load-fold-save cycle on the same row.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use eventhub_core::Clock;
use eventhub_events::{Event, EventProjection, Fold, ProjectionKey, StreamId};

use super::folds::{ActivityFold, CurrentStateFold};
use super::store::{ProjectionError, ProjectionStore};

/// What happened when one event met one projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "projection", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied(EventProjection),
    /// Already the last applied event; projection unchanged.
    Duplicate(EventProjection),
    /// Older than the last applied event; projection unchanged.
    OutOfOrder(EventProjection),
    /// The event names no entity.
    NoEntity,
}

impl ApplyOutcome {
    pub fn projection(&self) -> Option<&EventProjection> {
        match self {
            ApplyOutcome::Applied(p) | ApplyOutcome::Duplicate(p) | ApplyOutcome::OutOfOrder(p) => {
                Some(p)
            }
            ApplyOutcome::NoEntity => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied(_) => "applied",
            ApplyOutcome::Duplicate(_) => "duplicate",
            ApplyOutcome::OutOfOrder(_) => "out_of_order",
            ApplyOutcome::NoEntity => "no_entity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldOutcome {
    pub projection_name: String,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

pub struct ProjectionEngine {
    store: Arc<dyn ProjectionStore>,
    folds: Vec<Arc<dyn Fold>>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl ProjectionEngine {
    /// An engine with no folds registered.
    pub fn new(store: Arc<dyn ProjectionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            folds: Vec::new(),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// `current_state` and `activity`.
    pub fn with_default_folds(store: Arc<dyn ProjectionStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(store, clock)
            .with_fold(Arc::new(CurrentStateFold))
            .with_fold(Arc::new(ActivityFold))
    }

    pub fn with_fold(mut self, fold: Arc<dyn Fold>) -> Self {
        self.folds.retain(|f| f.name() != fold.name());
        self.folds.push(fold);
        self
    }

    pub fn fold_names(&self) -> Vec<&str> {
        self.folds.iter().map(|f| f.name()).collect()
    }

    fn fold_named(&self, projection_name: &str) -> Result<&Arc<dyn Fold>, ProjectionError> {
        self.folds
            .iter()
            .find(|f| f.name() == projection_name)
            .ok_or_else(|| ProjectionError::UnknownProjection(projection_name.to_string()))
    }

    /// Apply `event` to every registered projection.
    pub async fn apply(&self, event: &Event) -> Result<Vec<FoldOutcome>, ProjectionError> {
        let _guard = self.write_lock.lock().await;
        let mut outcomes = Vec::with_capacity(self.folds.len());
        for fold in &self.folds {
            let outcome = self.fold_one(fold.as_ref(), event, true).await?;
            outcomes.push(FoldOutcome {
                projection_name: fold.name().to_string(),
                outcome,
            });
        }
        Ok(outcomes)
    }

    /// Apply `event` to one named projection.
    pub async fn apply_to(
        &self,
        projection_name: &str,
        event: &Event,
    ) -> Result<ApplyOutcome, ProjectionError> {
        let fold = self.fold_named(projection_name)?;
        let _guard = self.write_lock.lock().await;
        self.fold_one(fold.as_ref(), event, true).await
    }

    /// What `apply` would do, without saving anything.
    pub async fn preview(&self, event: &Event) -> Result<Vec<FoldOutcome>, ProjectionError> {
        let mut outcomes = Vec::with_capacity(self.folds.len());
        for fold in &self.folds {
            let outcome = self.fold_one(fold.as_ref(), event, false).await?;
            outcomes.push(FoldOutcome {
                projection_name: fold.name().to_string(),
                outcome,
            });
        }
        Ok(outcomes)
    }

    pub async fn get(&self, key: &ProjectionKey) -> Result<Option<EventProjection>, ProjectionError> {
        self.store.load(key).await
    }

    pub async fn list(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EventProjection>, ProjectionError> {
        self.store.list_for_entity(entity_type, entity_id).await
    }

    /// Drop every projection of the stream's entity and refold `events`, which
    /// must be the stream in version order.
    pub async fn rebuild(
        &self,
        stream_id: &StreamId,
        events: &[Event],
    ) -> Result<Vec<EventProjection>, ProjectionError> {
        let _guard = self.write_lock.lock().await;
        let dropped = self
            .store
            .delete_for_entity(stream_id.entity_type(), stream_id.entity_id())
            .await?;
        debug!(stream_id = %stream_id, dropped, events = events.len(), "rebuilding projections");

        for event in events {
            for fold in &self.folds {
                self.fold_one(fold.as_ref(), event, true).await?;
            }
        }
        self.store
            .list_for_entity(stream_id.entity_type(), stream_id.entity_id())
            .await
    }

    async fn fold_one(
        &self,
        fold: &dyn Fold,
        event: &Event,
        persist: bool,
    ) -> Result<ApplyOutcome, ProjectionError> {
        let Some(key) = ProjectionKey::for_event(event, fold.name()) else {
            return Ok(ApplyOutcome::NoEntity);
        };

        let now = self.clock.now();
        let mut projection = match self.store.load(&key).await? {
            Some(p) => p,
            None => EventProjection::empty(key, fold.initial_state(), now),
        };

        if projection.has_applied(event) {
            return Ok(ApplyOutcome::Duplicate(projection));
        }
        if projection.is_behind(event) {
            if persist {
                warn!(
                    event_id = %event.event_id,
                    entity_type = %projection.entity_type,
                    entity_id = %projection.entity_id,
                    projection = %projection.projection_name,
                    "rejecting out-of-order event for projection"
                );
            }
            return Ok(ApplyOutcome::OutOfOrder(projection));
        }

        fold.fold(&mut projection.state, event);
        projection.mark_applied(event, now);
        if persist {
            self.store.save(&projection).await?;
        }
        Ok(ApplyOutcome::Applied(projection))
    }
}
