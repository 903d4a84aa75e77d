//! The built-in `projection` processor.

use std::sync::Arc;

use async_trait::async_trait;

use eventhub_events::Event;

use super::engine::{ApplyOutcome, ProjectionEngine};
use super::store::ProjectionError;
use crate::pipeline::{DispatchContext, Processor, ProcessorError};

/// Registry name of the built-in projection processor.
pub const PROJECTION_PROCESSOR: &str = "projection";

/// Folds every matching event into the engine's projections. Dry runs only
/// preview.
pub struct ProjectionProcessor {
    engine: Arc<ProjectionEngine>,
}

impl ProjectionProcessor {
    pub fn new(engine: Arc<ProjectionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Processor for ProjectionProcessor {
    async fn handle(
        &self,
        event: &Event,
        ctx: &DispatchContext,
    ) -> Result<Option<String>, ProcessorError> {
        let outcomes = if ctx.mode.is_dry_run() {
            self.engine.preview(event).await
        } else {
            self.engine.apply(event).await
        }
        .map_err(to_processor_error)?;

        if outcomes.iter().all(|o| o.outcome == ApplyOutcome::NoEntity) {
            return Ok(Some("no entity".to_string()));
        }

        let summary = outcomes
            .iter()
            .map(|o| format!("{}={}", o.projection_name, o.outcome.label()))
            .collect::<Vec<_>>()
            .join(",");
        Ok(Some(summary))
    }
}

fn to_processor_error(err: ProjectionError) -> ProcessorError {
    match err {
        ProjectionError::StorageUnavailable(msg) => ProcessorError::StorageUnavailable(msg),
        other => ProcessorError::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::store::InMemoryProjectionStore;
    use chrono::Utc;
    use eventhub_core::SystemClock;
    use eventhub_events::{EventCategory, EventSource, NewEvent, ProjectionKey};
    use serde_json::json;

    #[tokio::test]
    async fn dry_run_leaves_projections_untouched() {
        let engine = Arc::new(ProjectionEngine::with_default_folds(
            Arc::new(InMemoryProjectionStore::new()),
            Arc::new(SystemClock),
        ));
        let processor = ProjectionProcessor::new(engine.clone());
        let now = Utc::now();
        let event = NewEvent::new("user.created", EventSource::Api, EventCategory::Domain, json!({"name": "a"}))
            .with_entity("user", "u1")
            .into_event(now, now);

        let msg = processor
            .handle(&event, &DispatchContext::replay(true))
            .await
            .unwrap()
            .unwrap();
        assert!(msg.contains("current_state=applied"));
        let key = ProjectionKey::new("user", "u1", "current_state");
        assert!(engine.get(&key).await.unwrap().is_none());

        processor.handle(&event, &DispatchContext::live()).await.unwrap();
        assert_eq!(engine.get(&key).await.unwrap().unwrap().version, 1);
    }
}
