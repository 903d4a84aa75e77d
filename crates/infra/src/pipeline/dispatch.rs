//! Runs the selected processors against one event and turns each attempt
//! into an outcome. Handler errors never escape: they become failed
//! outcomes.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use eventhub_core::{EventId, ResultId};
use eventhub_events::{Event, ProcessingResult, ProcessorDescriptor, ResultStatus};

use super::processor::{DispatchContext, Processor};
use super::registry::ProcessorRegistry;

pub(crate) const NO_HANDLER: &str = "no handler bound";

/// Which processors a dispatch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchScope {
    /// Every enabled processor whose filters accept the event.
    All,
    /// Exactly one processor, as long as its filters accept the event.
    Processor(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorOutcome {
    pub processor_name: String,
    pub status: ResultStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ProcessorOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn into_result(self, event_id: EventId, at: DateTime<Utc>, replay: bool) -> ProcessingResult {
        ProcessingResult {
            result_id: ResultId::new(),
            event_id,
            processor_name: self.processor_name,
            status: self.status,
            message: self.message,
            duration_ms: self.duration_ms,
            processed_at: at,
            replay,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ProcessorRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProcessorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    /// Run every selected processor against `event`, in `(priority, name)`
    /// order. All of them run even when an earlier one failed; later ones see
    /// `earlier_failure` set in their context.
    pub async fn dispatch(
        &self,
        event: &Event,
        scope: &DispatchScope,
        ctx: &DispatchContext,
    ) -> Vec<ProcessorOutcome> {
        let selected = match scope {
            DispatchScope::All => self.registry.matching(event).await,
            DispatchScope::Processor(name) => match self.registry.resolve(name).await {
                Some((descriptor, handler)) if descriptor.filters.matches(event) => {
                    vec![(descriptor, handler)]
                }
                _ => Vec::new(),
            },
        };

        let mut ctx = ctx.clone();
        let mut outcomes = Vec::with_capacity(selected.len());
        for (descriptor, handler) in selected {
            let outcome = run_one(&descriptor, handler.as_deref(), event, &ctx).await;
            ctx.earlier_failure |= !outcome.succeeded();
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn run_one(
    descriptor: &ProcessorDescriptor,
    handler: Option<&dyn Processor>,
    event: &Event,
    ctx: &DispatchContext,
) -> ProcessorOutcome {
    let started = Instant::now();
    let result = match handler {
        Some(handler) => handler.handle(event, ctx).await.map_err(|e| e.to_string()),
        None => Err(NO_HANDLER.to_string()),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(message) => {
            debug!(event_id = %event.event_id, processor = %descriptor.name, duration_ms, "processor succeeded");
            ProcessorOutcome {
                processor_name: descriptor.name.clone(),
                status: ResultStatus::Success,
                message,
                duration_ms,
            }
        }
        Err(error) => {
            warn!(event_id = %event.event_id, processor = %descriptor.name, error = %error, "processor failed");
            ProcessorOutcome {
                processor_name: descriptor.name.clone(),
                status: ResultStatus::Failed,
                message: Some(error),
                duration_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use crate::pipeline::processor::{FnProcessor, ProcessorError};
    use crate::pipeline::registry::NewProcessor;
    use eventhub_events::{EventCategory, EventSource, NewEvent, ProcessorKind};
    use serde_json::json;

    async fn dispatcher() -> Dispatcher {
        let registry = Arc::new(ProcessorRegistry::new(Arc::new(InMemoryMetadataStore::new())));
        registry.bind_named(
            "broken",
            Arc::new(FnProcessor::new(|_, _| Err(ProcessorError::failed("boom")))),
        );
        registry.bind_named("fine", Arc::new(FnProcessor::new(|_, _| Ok(Some("ok".into())))));
        let now = Utc::now();
        registry
            .create(NewProcessor::new("broken", ProcessorKind::Custom).with_priority(1), now)
            .await
            .unwrap();
        registry
            .create(NewProcessor::new("fine", ProcessorKind::Custom).with_priority(2), now)
            .await
            .unwrap();
        Dispatcher::new(registry)
    }

    fn event() -> Event {
        let now = Utc::now();
        NewEvent::new("order.created", EventSource::Api, EventCategory::Domain, json!({}))
            .into_event(now, now)
    }

    #[tokio::test]
    async fn a_failing_processor_does_not_stop_later_ones() {
        let dispatcher = dispatcher().await;
        let outcomes = dispatcher
            .dispatch(&event(), &DispatchScope::All, &DispatchContext::live())
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].processor_name, "broken");
        assert_eq!(outcomes[0].status, ResultStatus::Failed);
        assert_eq!(outcomes[0].message.as_deref(), Some("boom"));
        assert!(outcomes[1].succeeded());
    }

    #[tokio::test]
    async fn scoped_dispatch_runs_one_processor() {
        let dispatcher = dispatcher().await;
        let outcomes = dispatcher
            .dispatch(
                &event(),
                &DispatchScope::Processor("fine".into()),
                &DispatchContext::replay(false),
            )
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].message.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn later_processors_see_the_earlier_failure() {
        let dispatcher = dispatcher().await;
        dispatcher.registry().bind_named(
            "observer",
            Arc::new(FnProcessor::new(|_, ctx| {
                Ok(Some(format!("earlier_failure={}", ctx.earlier_failure)))
            })),
        );
        dispatcher
            .registry()
            .create(NewProcessor::new("observer", ProcessorKind::Custom).with_priority(3), Utc::now())
            .await
            .unwrap();

        let outcomes = dispatcher
            .dispatch(&event(), &DispatchScope::All, &DispatchContext::live())
            .await;
        assert_eq!(outcomes[2].message.as_deref(), Some("earlier_failure=true"));

        let outcomes = dispatcher
            .dispatch(
                &event(),
                &DispatchScope::Processor("observer".into()),
                &DispatchContext::live(),
            )
            .await;
        assert_eq!(outcomes[0].message.as_deref(), Some("earlier_failure=false"));
    }
}
