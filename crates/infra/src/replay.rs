//! Replay: re-drive a bounded slice of the ledger through dispatch.
//!
//! Replay works on copies. It never transitions an event; a live replay only
//! appends audit rows flagged `replay = true` and re-delivers, while a dry run
//! writes nothing at all.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use eventhub_core::{Clock, EventId};
use eventhub_events::{Event, ResultStatus, StreamId};

use crate::ledger::{EventFilter, EventLedger, LedgerError, Pagination, SortOrder};
use crate::ledger::query::MAX_PAGE_SIZE;
use crate::pipeline::{DispatchContext, DispatchScope, Dispatcher};
use crate::subscriptions::{DELIVERY_PROCESSOR, SubscriptionRegistry};

/// Which events to replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplaySelector {
    /// One entity's stream, in version order.
    Stream { stream_id: StreamId },
    /// `created_at` within `[from, to]`, optionally narrowed to some types,
    /// in ledger order.
    TimeRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        #[serde(default)]
        event_types: Vec<String>,
    },
    /// Explicit ids, in ledger order. Unknown ids are reported as missing.
    EventIds { event_ids: Vec<EventId> },
}

/// What to re-drive the selected events through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayTarget {
    /// Every enabled, matching processor.
    #[default]
    All,
    /// One processor, enabled or not.
    Processor { name: String },
    /// Re-delivery to one subscriber only.
    Subscription { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub selector: ReplaySelector,
    #[serde(default)]
    pub target: ReplayTarget,
    #[serde(default)]
    pub dry_run: bool,
    /// Capped by the engine's configured maximum.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ReplayRequest {
    pub fn new(selector: ReplaySelector) -> Self {
        Self {
            selector,
            target: ReplayTarget::All,
            dry_run: false,
            limit: None,
        }
    }

    pub fn with_target(mut self, target: ReplayTarget) -> Self {
        self.target = target;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayProcessorOutcome {
    pub processor_name: String,
    pub status: ResultStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayEventOutcome {
    pub event_id: EventId,
    pub event_type: String,
    pub status: ResultStatus,
    pub processors: Vec<ReplayProcessorOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub events_count: usize,
    pub dry_run: bool,
    pub succeeded: usize,
    pub failed: usize,
    /// Requested ids the ledger does not know.
    pub missing: Vec<EventId>,
    /// The selection was cut at the limit.
    pub truncated: bool,
    pub outcomes: Vec<ReplayEventOutcome>,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct ReplayEngine {
    ledger: Arc<dyn EventLedger>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: Arc<SubscriptionRegistry>,
    clock: Arc<dyn Clock>,
    max_events: usize,
}

impl ReplayEngine {
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        dispatcher: Arc<Dispatcher>,
        subscriptions: Arc<SubscriptionRegistry>,
        clock: Arc<dyn Clock>,
        max_events: usize,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            subscriptions,
            clock,
            max_events: max_events.max(1),
        }
    }

    #[instrument(skip(self, request), fields(dry_run = request.dry_run), err)]
    pub async fn replay(&self, request: &ReplayRequest) -> Result<ReplaySummary, ReplayError> {
        let (scope, mut ctx) = self.resolve_target(&request.target).await?;
        if request.dry_run {
            ctx.mode = crate::pipeline::DispatchMode::DryRun;
        }

        let limit = request
            .limit
            .unwrap_or(self.max_events)
            .min(self.max_events);
        let (mut events, missing) = self.select(&request.selector, limit).await?;
        let truncated = events.len() > limit;
        events.truncate(limit);

        let mut summary = ReplaySummary {
            dry_run: request.dry_run,
            missing,
            truncated,
            ..ReplaySummary::default()
        };

        for event in &events {
            let outcomes = self.dispatcher.dispatch(event, &scope, &ctx).await;
            let now = self.clock.now();

            let failures: Vec<String> = outcomes
                .iter()
                .filter(|o| !o.succeeded())
                .map(|o| format!("{}: {}", o.processor_name, o.message.as_deref().unwrap_or("")))
                .collect();
            let processors = outcomes
                .iter()
                .map(|o| ReplayProcessorOutcome {
                    processor_name: o.processor_name.clone(),
                    status: o.status,
                    message: o.message.clone(),
                })
                .collect();

            if !request.dry_run {
                for outcome in outcomes {
                    self.ledger
                        .record_result(&outcome.into_result(event.event_id, now, true))
                        .await?;
                }
            }

            let status = if failures.is_empty() {
                summary.succeeded += 1;
                ResultStatus::Success
            } else {
                summary.failed += 1;
                ResultStatus::Failed
            };
            summary.outcomes.push(ReplayEventOutcome {
                event_id: event.event_id,
                event_type: event.event_type.clone(),
                status,
                processors,
                error: (!failures.is_empty()).then(|| failures.join("; ")),
            });
        }
        summary.events_count = summary.outcomes.len();

        info!(
            events = summary.events_count,
            succeeded = summary.succeeded,
            failed = summary.failed,
            missing = summary.missing.len(),
            dry_run = request.dry_run,
            "replay finished"
        );
        Ok(summary)
    }

    async fn resolve_target(
        &self,
        target: &ReplayTarget,
    ) -> Result<(DispatchScope, DispatchContext), ReplayError> {
        match target {
            ReplayTarget::All => Ok((DispatchScope::All, DispatchContext::replay(false))),
            ReplayTarget::Processor { name } => {
                if self.dispatcher.registry().get(name).await.is_none() {
                    return Err(ReplayError::NotFound(format!("processor {name:?} not found")));
                }
                Ok((
                    DispatchScope::Processor(name.clone()),
                    DispatchContext::replay(false),
                ))
            }
            ReplayTarget::Subscription { name } => {
                if self.subscriptions.get(name).await.is_none() {
                    return Err(ReplayError::NotFound(format!(
                        "subscription {name:?} not found"
                    )));
                }
                if self.dispatcher.registry().get(DELIVERY_PROCESSOR).await.is_none() {
                    return Err(ReplayError::Validation(
                        "no delivery processor registered".to_string(),
                    ));
                }
                Ok((
                    DispatchScope::Processor(DELIVERY_PROCESSOR.to_string()),
                    DispatchContext::replay(false).for_subscriber(name.clone()),
                ))
            }
        }
    }

    /// Up to `limit + 1` events, so the caller can tell the slice was cut.
    async fn select(
        &self,
        selector: &ReplaySelector,
        limit: usize,
    ) -> Result<(Vec<Event>, Vec<EventId>), ReplayError> {
        match selector {
            ReplaySelector::Stream { stream_id } => {
                let mut events = self.ledger.load_stream(stream_id).await?;
                events.truncate(limit + 1);
                Ok((events, Vec::new()))
            }
            ReplaySelector::TimeRange {
                from,
                to,
                event_types,
            } => {
                if from > to {
                    return Err(ReplayError::Validation(
                        "time range start is after its end".to_string(),
                    ));
                }
                let filter = EventFilter {
                    created_after: Some(*from),
                    created_before: Some(*to),
                    event_types: event_types.clone(),
                    order: SortOrder::OldestFirst,
                    ..EventFilter::default()
                };
                Ok((self.query_all(&filter, limit + 1).await?, Vec::new()))
            }
            ReplaySelector::EventIds { event_ids } => {
                let found = self.ledger.get_many(event_ids).await?;
                let known: HashSet<EventId> = found.iter().map(|e| e.event_id).collect();
                let mut seen = HashSet::new();
                let missing = event_ids
                    .iter()
                    .filter(|id| !known.contains(id) && seen.insert(**id))
                    .copied()
                    .collect();
                let mut events = found;
                events.truncate(limit + 1);
                Ok((events, missing))
            }
        }
    }

    async fn query_all(&self, filter: &EventFilter, want: usize) -> Result<Vec<Event>, LedgerError> {
        let mut events = Vec::new();
        let mut offset = 0u32;
        while events.len() < want {
            let page_size = (want - events.len()).min(MAX_PAGE_SIZE as usize) as u32;
            let page = self
                .ledger
                .query(filter, Pagination::new(Some(page_size), Some(offset)))
                .await?;
            let fetched = page.events.len();
            events.extend(page.events);
            if !page.has_more || fetched == 0 {
                break;
            }
            offset += fetched as u32;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use crate::pipeline::{FnProcessor, NewProcessor, ProcessorError, ProcessorRegistry};
    use eventhub_core::ManualClock;
    use eventhub_events::{EventCategory, EventSource, EventStatus, NewEvent, ProcessorKind};
    use serde_json::json;

    use crate::ledger::InMemoryLedger;

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        engine: ReplayEngine,
    }

    async fn fixture(max_events: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.clone()));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let registry = Arc::new(ProcessorRegistry::new(metadata.clone()));
        registry.bind_named("ok", Arc::new(FnProcessor::new(|_, _| Ok(Some("seen".into())))));
        registry.bind_named(
            "picky",
            Arc::new(FnProcessor::new(|e, _| {
                if e.event_type == "order.cancelled" {
                    Err(ProcessorError::failed("cannot handle cancellations"))
                } else {
                    Ok(None)
                }
            })),
        );
        for name in ["ok", "picky"] {
            registry
                .create(NewProcessor::new(name, ProcessorKind::Custom), Utc::now())
                .await
                .unwrap();
        }
        let engine = ReplayEngine::new(
            ledger.clone(),
            Arc::new(Dispatcher::new(registry)),
            Arc::new(SubscriptionRegistry::new(metadata)),
            clock,
            max_events,
        );
        Fixture { ledger, engine }
    }

    async fn append(f: &Fixture, event_type: &str, entity_id: &str) -> Event {
        f.ledger
            .append(
                NewEvent::new(event_type, EventSource::Api, EventCategory::Domain, json!({}))
                    .with_entity("order", entity_id),
            )
            .await
            .unwrap()
    }

    fn stream(id: &str) -> ReplaySelector {
        ReplaySelector::Stream {
            stream_id: StreamId::new("order", id),
        }
    }

    #[tokio::test]
    async fn stream_replay_keeps_version_order() {
        let f = fixture(100).await;
        let e1 = append(&f, "order.created", "o1").await;
        append(&f, "order.created", "o2").await;
        let e2 = append(&f, "order.updated", "o1").await;
        let e3 = append(&f, "order.cancelled", "o1").await;

        let summary = f.engine.replay(&ReplayRequest::new(stream("o1"))).await.unwrap();

        assert_eq!(summary.events_count, 3);
        let ids: Vec<_> = summary.outcomes.iter().map(|o| o.event_id).collect();
        assert_eq!(ids, vec![e1.event_id, e2.event_id, e3.event_id]);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(summary.outcomes[2].error.as_deref().unwrap().contains("picky"));
    }

    #[tokio::test]
    async fn replay_never_touches_status_and_flags_audit_rows() {
        let f = fixture(100).await;
        let e = append(&f, "order.created", "o1").await;

        f.engine.replay(&ReplayRequest::new(stream("o1"))).await.unwrap();

        let stored = f.ledger.get(e.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        let rows = f.ledger.results_for(e.event_id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.replay));
    }

    #[tokio::test]
    async fn dry_runs_are_repeatable_and_write_nothing() {
        let f = fixture(100).await;
        let e = append(&f, "order.created", "o1").await;
        let request = ReplayRequest::new(stream("o1")).dry_run();

        let first = f.engine.replay(&request).await.unwrap();
        let second = f.engine.replay(&request).await.unwrap();

        assert_eq!(first, second);
        assert!(first.dry_run);
        assert!(f.ledger.results_for(e.event_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_selection_is_an_empty_summary() {
        let f = fixture(100).await;
        let summary = f.engine.replay(&ReplayRequest::new(stream("ghost"))).await.unwrap();
        assert_eq!(summary.events_count, 0);
        assert!(summary.outcomes.is_empty());
    }

    #[tokio::test]
    async fn id_lists_report_missing_ids() {
        let f = fixture(100).await;
        let e = append(&f, "order.created", "o1").await;
        let ghost = EventId::new();
        let summary = f
            .engine
            .replay(&ReplayRequest::new(ReplaySelector::EventIds {
                event_ids: vec![ghost, e.event_id],
            }))
            .await
            .unwrap();
        assert_eq!(summary.events_count, 1);
        assert_eq!(summary.missing, vec![ghost]);
    }

    #[tokio::test]
    async fn time_range_filters_by_type_and_respects_the_cap() {
        let f = fixture(2).await;
        for _ in 0..3 {
            append(&f, "order.created", "o1").await;
        }
        append(&f, "order.updated", "o1").await;

        let summary = f
            .engine
            .replay(&ReplayRequest::new(ReplaySelector::TimeRange {
                from: Utc::now() - chrono::Duration::hours(1),
                to: Utc::now() + chrono::Duration::hours(1),
                event_types: vec!["order.created".into()],
            }))
            .await
            .unwrap();
        assert_eq!(summary.events_count, 2);
        assert!(summary.truncated);
        assert!(summary.outcomes.iter().all(|o| o.event_type == "order.created"));
    }

    #[tokio::test]
    async fn unknown_targets_are_not_found() {
        let f = fixture(100).await;
        let err = f
            .engine
            .replay(
                &ReplayRequest::new(stream("o1")).with_target(ReplayTarget::Processor {
                    name: "nope".into(),
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::NotFound(_)));
    }
}
