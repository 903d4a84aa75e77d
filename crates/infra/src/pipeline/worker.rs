//! The periodic processing pipeline.
//!
//! One cycle, run to completion under a lock:
//! 1. return claims older than `claim_lease` to `pending`,
//! 2. archive failed events whose retries are exhausted,
//! 3. requeue failed events still due for retry,
//! 4. claim up to `batch_size` pending events (oldest first),
//! 5. dispatch each through every matching processor, write one audit row
//!    per attempt, then commit `processed` or `failed`.
//!
//! If a cycle aborts mid-batch, the claims it did not commit are released
//! straight away when the ledger allows it, and by the lease otherwise.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use eventhub_core::Clock;
use eventhub_events::{Event, EventStatus, StatusUpdate};

use super::dispatch::{DispatchScope, Dispatcher};
use super::processor::DispatchContext;
use crate::config::PipelineConfig;
use crate::ledger::{EventFilter, EventLedger, LedgerError, Pagination};

/// Counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub reclaimed: usize,
    pub claimed: usize,
    pub processed: usize,
    pub failed: usize,
    pub requeued: usize,
    pub archived: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Running totals since the pipeline was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub reclaimed: u64,
    pub claimed: u64,
    pub processed: u64,
    pub failed: u64,
    pub requeued: u64,
    pub archived: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl PipelineStats {
    fn record(&mut self, report: &CycleReport, at: DateTime<Utc>) {
        self.cycles += 1;
        self.reclaimed += report.reclaimed as u64;
        self.claimed += report.claimed as u64;
        self.processed += report.processed as u64;
        self.failed += report.failed as u64;
        self.requeued += report.requeued as u64;
        self.archived += report.archived as u64;
        self.last_cycle_at = Some(at);
    }
}

pub struct Pipeline {
    ledger: Arc<dyn EventLedger>,
    dispatcher: Arc<Dispatcher>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    cycle_lock: Mutex<()>,
    stats: StdMutex<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        dispatcher: Arc<Dispatcher>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            config,
            clock,
            cycle_lock: Mutex::new(()),
            stats: StdMutex::new(PipelineStats::default()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Run one full cycle. Cycles never overlap: a caller arriving while one
    /// runs waits for it to commit.
    ///
    /// A `StorageUnavailable` from the ledger aborts the cycle; nothing after
    /// the failing call is attempted.
    pub async fn run_cycle(&self) -> Result<CycleReport, LedgerError> {
        let _guard = self.cycle_lock.lock().await;
        let result = self.cycle().await;

        if let Ok(mut stats) = self.stats.lock() {
            match &result {
                Ok(report) => stats.record(report, self.clock.now()),
                Err(_) => stats.failed_cycles += 1,
            }
        }
        result
    }

    /// Run cycles until one finds nothing to do, or `max_cycles` ran.
    pub async fn run_until_idle(&self, max_cycles: usize) -> Result<CycleReport, LedgerError> {
        let mut total = CycleReport::default();
        for _ in 0..max_cycles {
            let report = self.run_cycle().await?;
            if report.is_idle() {
                break;
            }
            total.reclaimed += report.reclaimed;
            total.claimed += report.claimed;
            total.processed += report.processed;
            total.failed += report.failed;
            total.requeued += report.requeued;
            total.archived += report.archived;
        }
        Ok(total)
    }

    async fn cycle(&self) -> Result<CycleReport, LedgerError> {
        let mut report = CycleReport::default();
        let limit = Pagination::first(self.config.batch_size as u32);

        let lease = TimeDelta::from_std(self.config.claim_lease).unwrap_or(TimeDelta::MAX);
        let claimed_before = self
            .clock
            .now()
            .checked_sub_signed(lease)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let reclaimed = self.ledger.reclaim_expired(claimed_before).await?;
        if !reclaimed.is_empty() {
            warn!(
                pipeline = %self.config.name,
                count = reclaimed.len(),
                lease_ms = self.config.claim_lease.as_millis() as u64,
                "claims expired without commit, events back to pending"
            );
        }
        report.reclaimed = reclaimed.len();

        let exhausted = self
            .ledger
            .query(&EventFilter::retries_exhausted(self.config.max_retries), limit)
            .await?;
        for event in exhausted.events {
            let update = event
                .archive()
                .map_err(|e| LedgerError::InvalidTransition(e.to_string()))?;
            if self.move_status(&event, EventStatus::Failed, update).await? {
                warn!(
                    pipeline = %self.config.name,
                    event_id = %event.event_id,
                    retry_count = event.retry_count,
                    error = event.error_message.as_deref().unwrap_or(""),
                    "event archived after exhausting retries"
                );
                report.archived += 1;
            }
        }

        let due = self
            .ledger
            .query(&EventFilter::due_for_retry(self.config.max_retries), limit)
            .await?;
        for event in due.events {
            let update = event
                .requeue()
                .map_err(|e| LedgerError::InvalidTransition(e.to_string()))?;
            if self.move_status(&event, EventStatus::Failed, update).await? {
                debug!(pipeline = %self.config.name, event_id = %event.event_id, retry_count = event.retry_count, "event requeued");
                report.requeued += 1;
            }
        }

        let claimed = self.ledger.claim_pending(self.config.batch_size).await?;
        report.claimed = claimed.len();
        for (i, event) in claimed.iter().enumerate() {
            match self.process(event).await {
                Ok(true) => report.processed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    self.release(&claimed[i..]).await;
                    return Err(e);
                }
            }
        }

        if !report.is_idle() {
            info!(
                pipeline = %self.config.name,
                reclaimed = report.reclaimed,
                claimed = report.claimed,
                processed = report.processed,
                failed = report.failed,
                requeued = report.requeued,
                archived = report.archived,
                "pipeline cycle complete"
            );
        }
        Ok(report)
    }

    /// Dispatch one claimed event and commit its status. Returns whether every
    /// processor succeeded.
    async fn process(&self, event: &Event) -> Result<bool, LedgerError> {
        let outcomes = self
            .dispatcher
            .dispatch(event, &DispatchScope::All, &DispatchContext::live())
            .await;

        let now = self.clock.now();
        let mut failures = Vec::new();
        for outcome in outcomes {
            if !outcome.succeeded() {
                let message = outcome.message.clone().unwrap_or_default();
                self.dispatcher
                    .registry()
                    .record_failure(&outcome.processor_name, &message, now)
                    .await;
                failures.push(format!("{}: {}", outcome.processor_name, message));
            }
            self.ledger
                .record_result(&outcome.into_result(event.event_id, now, false))
                .await?;
        }

        let succeeded = failures.is_empty();
        let update = if succeeded {
            event.complete(now)
        } else {
            event.fail(failures.join("; "), now)
        }
        .map_err(|e| LedgerError::InvalidTransition(e.to_string()))?;
        self.move_status(event, EventStatus::Processing, update).await?;
        Ok(succeeded)
    }

    /// Hand uncommitted claims back to `pending` after an aborted cycle.
    /// Best effort: whatever cannot be released waits for the lease.
    async fn release(&self, events: &[Event]) {
        for event in events {
            let update = match event.release() {
                Ok(update) => update,
                Err(e) => {
                    warn!(event_id = %event.event_id, error = %e, "claim not releasable");
                    continue;
                }
            };
            match self.move_status(event, EventStatus::Processing, update).await {
                Ok(_) => debug!(event_id = %event.event_id, "claim released"),
                Err(e) => {
                    warn!(
                        pipeline = %self.config.name,
                        event_id = %event.event_id,
                        error = %e,
                        "claim release failed, left for lease reclaim"
                    );
                    if matches!(e, LedgerError::StorageUnavailable(_)) {
                        return;
                    }
                }
            }
        }
    }

    /// Compare-and-set a status. Losing the race is not an error: the event is
    /// somebody else's now.
    async fn move_status(
        &self,
        event: &Event,
        from: EventStatus,
        update: StatusUpdate,
    ) -> Result<bool, LedgerError> {
        match self.ledger.transition(event.event_id, from, update).await {
            Ok(_) => Ok(true),
            Err(LedgerError::StaleStatus { actual, .. }) => {
                debug!(event_id = %event.event_id, expected = %from, actual = %actual, "status moved underneath the pipeline");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Drive cycles on `config.interval` until the handle is shut down.
    pub fn spawn(self: Arc<Self>) -> PipelineHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let pipeline = self.clone();

        let join = tokio::spawn(async move {
            info!(
                pipeline = %pipeline.config.name,
                interval_ms = pipeline.config.interval.as_millis() as u64,
                batch_size = pipeline.config.batch_size,
                "pipeline started"
            );
            let mut ticker = tokio::time::interval(pipeline.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }
                // Not inside the select: a started cycle always finishes.
                if let Err(e) = pipeline.run_cycle().await {
                    error!(pipeline = %pipeline.config.name, error = %e, "pipeline cycle aborted");
                }
            }
            info!(pipeline = %pipeline.config.name, "pipeline stopped");
        });

        PipelineHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            pipeline: self,
        }
    }
}

/// Control for a spawned pipeline.
pub struct PipelineHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    pipeline: Arc<Pipeline>,
}

impl PipelineHandle {
    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Stop after the in-flight cycle, if any, commits.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "pipeline task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use eventhub_core::{EventId, ManualClock};
    use eventhub_events::{
        EventCategory, EventSource, EventStream, NewEvent, ProcessingResult, ProcessorKind,
        ResultStatus, StreamId,
    };
    use serde_json::json;

    use crate::ledger::{EventQueryResult, InMemoryLedger};
    use crate::metadata::InMemoryMetadataStore;
    use crate::pipeline::processor::{FnProcessor, Processor, ProcessorError};
    use crate::pipeline::registry::{NewProcessor, ProcessorRegistry};

    struct Harness {
        clock: Arc<ManualClock>,
        ledger: Arc<InMemoryLedger>,
        registry: Arc<ProcessorRegistry>,
        pipeline: Arc<Pipeline>,
    }

    fn harness(max_retries: u32) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.clone()));
        let registry = Arc::new(ProcessorRegistry::new(Arc::new(InMemoryMetadataStore::new())));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let config = PipelineConfig::default()
            .with_batch_size(10)
            .with_max_retries(max_retries)
            .with_interval(Duration::from_millis(5));
        let pipeline = Arc::new(Pipeline::new(ledger.clone(), dispatcher, config, clock.clone()));
        Harness {
            clock,
            ledger,
            registry,
            pipeline,
        }
    }

    async fn register(h: &Harness, name: &str, priority: i32, fail: bool) {
        let handler = FnProcessor::new(move |_, _| {
            if fail {
                Err(ProcessorError::failed("always broken"))
            } else {
                Ok(None)
            }
        });
        h.registry.bind_named(name, Arc::new(handler));
        h.registry
            .create(
                NewProcessor::new(name, ProcessorKind::Custom).with_priority(priority),
                Utc::now(),
            )
            .await
            .unwrap();
    }

    fn new_event() -> NewEvent {
        NewEvent::new("order.created", EventSource::Api, EventCategory::Domain, json!({}))
            .with_entity("order", "o1")
    }

    #[tokio::test]
    async fn successful_dispatch_marks_processed_with_audit_rows() {
        let h = harness(3);
        register(&h, "a", 1, false).await;
        register(&h, "b", 2, false).await;
        let event = h.ledger.append(new_event()).await.unwrap();

        let report = h.pipeline.run_cycle().await.unwrap();
        assert_eq!(report.processed, 1);

        let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Processed);
        assert!(stored.processed_at.is_some());
        let results = h.ledger.results_for(event.event_id).await.unwrap();
        let names: Vec<_> = results.iter().map(|r| r.processor_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn any_failure_fails_the_event_but_every_processor_runs() {
        let h = harness(3);
        register(&h, "broken", 1, true).await;
        register(&h, "fine", 2, false).await;
        let event = h.ledger.append(new_event()).await.unwrap();

        h.pipeline.run_cycle().await.unwrap();

        let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error_message.unwrap().contains("always broken"));
        let results = h.ledger.results_for(event.event_id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert_eq!(results[1].status, ResultStatus::Success);

        let broken = h.registry.get("broken").await.unwrap();
        assert_eq!(broken.error_count, 1);
    }

    #[tokio::test]
    async fn failing_events_archive_exactly_at_max_retries() {
        let h = harness(3);
        register(&h, "broken", 1, true).await;
        let event = h.ledger.append(new_event()).await.unwrap();

        let mut seen_retry_counts = Vec::new();
        for _ in 0..10 {
            h.pipeline.run_cycle().await.unwrap();
            let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
            assert!(stored.retry_count <= 3);
            seen_retry_counts.push(stored.retry_count);
            if stored.status == EventStatus::Archived {
                break;
            }
        }

        let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Archived);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(seen_retry_counts, vec![1, 2, 3, 3]);
        assert_eq!(h.ledger.results_for(event.event_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn events_without_matching_processors_still_complete() {
        let h = harness(3);
        let event = h.ledger.append(new_event()).await.unwrap();
        h.pipeline.run_cycle().await.unwrap();
        let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Processed);
    }

    #[tokio::test]
    async fn storage_outage_aborts_the_cycle() {
        let h = harness(3);
        h.ledger.append(new_event()).await.unwrap();
        h.ledger.set_available(false);

        let err = h.pipeline.run_cycle().await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert_eq!(h.pipeline.stats().failed_cycles, 1);
    }

    #[tokio::test]
    async fn spawned_pipeline_drains_and_shuts_down() {
        let h = harness(3);
        let seen = Arc::new(AtomicBool::new(false));
        let flag = seen.clone();
        h.registry.bind_named(
            "flag",
            Arc::new(FnProcessor::new(move |_, _| {
                flag.store(true, Ordering::SeqCst);
                Ok(None)
            })),
        );
        h.registry
            .create(NewProcessor::new("flag", ProcessorKind::Custom), Utc::now())
            .await
            .unwrap();
        let event = h.ledger.append(new_event()).await.unwrap();

        let handle = h.pipeline.clone().spawn();
        for _ in 0..200 {
            let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
            if stored.status == EventStatus::Processed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.stats().cycles >= 1);
        handle.shutdown().await;

        assert!(seen.load(Ordering::SeqCst));
        let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Processed);
    }

    #[tokio::test]
    async fn outage_inside_a_cycle_is_recovered_by_the_claim_lease() {
        let h = harness(3);
        let ledger = h.ledger.clone();
        let tripped = Arc::new(AtomicBool::new(false));
        let trip = tripped.clone();
        h.registry.bind_named(
            "outage",
            Arc::new(FnProcessor::new(move |_, _| {
                if !trip.swap(true, Ordering::SeqCst) {
                    ledger.set_available(false);
                }
                Ok(None)
            })),
        );
        h.registry
            .create(NewProcessor::new("outage", ProcessorKind::Custom), Utc::now())
            .await
            .unwrap();
        let event = h.ledger.append(new_event()).await.unwrap();

        let err = h.pipeline.run_cycle().await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        h.ledger.set_available(true);

        // Release failed with the store down; the claim is still live.
        let report = h.pipeline.run_cycle().await.unwrap();
        assert_eq!(report.claimed, 0);
        let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Processing);

        let lease = TimeDelta::from_std(h.pipeline.config().claim_lease).unwrap();
        h.clock.advance(lease + TimeDelta::seconds(1));
        let report = h.pipeline.run_cycle().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.processed, 1);

        let stored = h.ledger.get(event.event_id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Processed);
        assert_eq!(stored.retry_count, 0);
        let results = h.ledger.results_for(event.event_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(h.pipeline.stats().reclaimed, 1);
    }

    /// Delegates to an in-memory ledger but fails the next `record_result`.
    struct FlakyResults {
        inner: Arc<InMemoryLedger>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl EventLedger for FlakyResults {
        async fn append(&self, event: NewEvent) -> Result<Event, LedgerError> {
            self.inner.append(event).await
        }
        async fn get(&self, event_id: EventId) -> Result<Option<Event>, LedgerError> {
            self.inner.get(event_id).await
        }
        async fn get_many(&self, ids: &[EventId]) -> Result<Vec<Event>, LedgerError> {
            self.inner.get_many(ids).await
        }
        async fn query(
            &self,
            filter: &EventFilter,
            page: Pagination,
        ) -> Result<EventQueryResult, LedgerError> {
            self.inner.query(filter, page).await
        }
        async fn get_stream(&self, stream_id: &StreamId) -> Result<Option<EventStream>, LedgerError> {
            self.inner.get_stream(stream_id).await
        }
        async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<Event>, LedgerError> {
            self.inner.load_stream(stream_id).await
        }
        async fn claim_pending(&self, limit: usize) -> Result<Vec<Event>, LedgerError> {
            self.inner.claim_pending(limit).await
        }
        async fn reclaim_expired(
            &self,
            claimed_before: DateTime<Utc>,
        ) -> Result<Vec<EventId>, LedgerError> {
            self.inner.reclaim_expired(claimed_before).await
        }
        async fn transition(
            &self,
            event_id: EventId,
            from: EventStatus,
            update: StatusUpdate,
        ) -> Result<Event, LedgerError> {
            self.inner.transition(event_id, from, update).await
        }
        async fn record_result(&self, result: &ProcessingResult) -> Result<(), LedgerError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::StorageUnavailable("write timed out".into()));
            }
            self.inner.record_result(result).await
        }
        async fn results_for(&self, event_id: EventId) -> Result<Vec<ProcessingResult>, LedgerError> {
            self.inner.results_for(event_id).await
        }
    }

    #[tokio::test]
    async fn aborted_cycle_releases_its_uncommitted_claims() {
        let h = harness(3);
        register(&h, "a", 1, false).await;
        let flaky = Arc::new(FlakyResults {
            inner: h.ledger.clone(),
            fail_next: AtomicBool::new(true),
        });
        let pipeline = Pipeline::new(
            flaky,
            Arc::new(Dispatcher::new(h.registry.clone())),
            PipelineConfig::default().with_batch_size(10),
            h.clock.clone(),
        );
        let first = h.ledger.append(new_event()).await.unwrap();
        let second = h.ledger.append(new_event()).await.unwrap();

        assert!(pipeline.run_cycle().await.is_err());
        for id in [first.event_id, second.event_id] {
            let stored = h.ledger.get(id).await.unwrap().unwrap();
            assert_eq!(stored.status, EventStatus::Pending);
            assert_eq!(stored.retry_count, 0);
        }

        // No lease wait: both come straight back on the next cycle.
        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.reclaimed, 0);
        assert_eq!(report.claimed, 2);
        assert_eq!(report.processed, 2);
        for id in [first.event_id, second.event_id] {
            let stored = h.ledger.get(id).await.unwrap().unwrap();
            assert_eq!(stored.status, EventStatus::Processed);
            assert_eq!(h.ledger.results_for(id).await.unwrap().len(), 1);
        }
    }

    /// Yields mid-handle so a concurrent caller gets a chance to interleave.
    struct Yielding;

    #[async_trait]
    impl Processor for Yielding {
        async fn handle(
            &self,
            _event: &Event,
            _ctx: &DispatchContext,
        ) -> Result<Option<String>, ProcessorError> {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            Ok(Some("slow".into()))
        }
    }

    #[tokio::test]
    async fn concurrent_cycles_dispatch_each_event_once() {
        const EVENTS: usize = 6;
        let h = harness(3);
        h.registry.bind_named("slow", Arc::new(Yielding));
        h.registry
            .create(NewProcessor::new("slow", ProcessorKind::Custom).with_priority(1), Utc::now())
            .await
            .unwrap();
        register(&h, "fast", 2, false).await;
        let mut ids = Vec::new();
        for _ in 0..EVENTS {
            ids.push(h.ledger.append(new_event()).await.unwrap().event_id);
        }

        let (a, b) = tokio::join!(h.pipeline.run_cycle(), h.pipeline.run_cycle());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.claimed + b.claimed, EVENTS);
        assert_eq!(a.processed + b.processed, EVENTS);

        for id in ids {
            let stored = h.ledger.get(id).await.unwrap().unwrap();
            assert_eq!(stored.status, EventStatus::Processed);
            let results = h.ledger.results_for(id).await.unwrap();
            let names: HashSet<_> = results.iter().map(|r| r.processor_name.clone()).collect();
            assert_eq!(results.len(), 2);
            assert_eq!(names, HashSet::from(["slow".to_string(), "fast".to_string()]));
            assert!(results.iter().all(|r| !r.replay));
        }
    }
}
