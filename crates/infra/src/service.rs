//! `EventService`: the one entry point the HTTP layer (and embedding code)
//! talks to. It owns the wiring between ledger, registries, projection engine,
//! pipeline and replay, and folds every component error into [`ServiceError`].

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use eventhub_core::{Clock, DomainError, EventId, SystemClock};
use eventhub_events::{
    DeliveryEnvelope, DeliveryTarget, Event, EventMatcher, EventProjection, EventStream,
    InMemoryEventBus, NewEvent, ProcessingResult, ProcessorDescriptor, ProcessorKind,
    ProjectionKey, StreamId, SubscriptionDescriptor,
};

use crate::config::{PipelineConfig, ServiceConfig};
use crate::ledger::{
    EventFilter, EventLedger, EventQueryResult, InMemoryLedger, LedgerError, Pagination,
    PostgresLedger,
};
use crate::metadata::{InMemoryMetadataStore, MetadataStore, PostgresMetadataStore};
use crate::pipeline::{
    CycleReport, Dispatcher, NewProcessor, Pipeline, PipelineHandle, PipelineStats, Processor,
    ProcessorRegistry, RegistryError,
};
use crate::projections::{
    InMemoryProjectionStore, PROJECTION_PROCESSOR, PostgresProjectionStore, ProjectionEngine,
    ProjectionError, ProjectionProcessor, ProjectionStore,
};
use crate::replay::{ReplayEngine, ReplayError, ReplayRequest, ReplaySummary};
use crate::subscriptions::{
    BusDeliverer, DELIVERY_PROCESSOR, Deliverer, DeliveryAttempt, DeliveryLog, DeliveryProcessor,
    RoutingDeliverer, SubscriptionError, SubscriptionRegistry, WebhookDeliverer,
};

/// Errors surfaced to callers of the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound(msg) => Self::NotFound(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => Self::NotFound(format!("event {id} not found")),
            LedgerError::DuplicateEvent(id) => Self::Conflict(format!("event {id} already exists")),
            LedgerError::StaleStatus { .. } | LedgerError::InvalidTransition(_) => {
                Self::Conflict(err.to_string())
            }
            LedgerError::StorageUnavailable(msg) | LedgerError::Corrupt(msg) => {
                Self::StorageUnavailable(msg)
            }
        }
    }
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => Self::Validation(msg),
            RegistryError::Conflict(msg) => Self::Conflict(msg),
            RegistryError::NotFound(msg) => Self::NotFound(msg),
            RegistryError::Storage(e) => Self::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<SubscriptionError> for ServiceError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Validation(msg) => Self::Validation(msg),
            SubscriptionError::Conflict(msg) => Self::Conflict(msg),
            SubscriptionError::NotFound(msg) => Self::NotFound(msg),
            SubscriptionError::Storage(e) => Self::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<ProjectionError> for ServiceError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::UnknownProjection(name) => {
                Self::NotFound(format!("unknown projection {name:?}"))
            }
            ProjectionError::StorageUnavailable(msg) | ProjectionError::Corrupt(msg) => {
                Self::StorageUnavailable(msg)
            }
        }
    }
}

impl From<ReplayError> for ServiceError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::NotFound(msg) => Self::NotFound(msg),
            ReplayError::Validation(msg) => Self::Validation(msg),
            ReplayError::Ledger(e) => e.into(),
        }
    }
}

/// Per-item outcome of a batch ingest.
pub type BatchItem = Result<Event, ServiceError>;

/// An event stream with its events, in version order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamView {
    #[serde(flatten)]
    pub stream: EventStream,
    pub events: Vec<Event>,
}

/// Assembles an [`EventService`] from its stores.
pub struct EventServiceBuilder {
    ledger: Arc<dyn EventLedger>,
    metadata: Arc<dyn MetadataStore>,
    projections: Arc<dyn ProjectionStore>,
    clock: Arc<dyn Clock>,
    pipeline: PipelineConfig,
    delivery_timeout: std::time::Duration,
    replay_max_events: usize,
    channel_deliverer: Option<Arc<dyn Deliverer>>,
    handlers: Vec<(String, Arc<dyn Processor>)>,
}

impl EventServiceBuilder {
    /// Everything in memory, driven by `clock`.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::from_stores(
            Arc::new(InMemoryLedger::with_clock(clock.clone())),
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryProjectionStore::new()),
            clock,
        )
    }

    /// Postgres-backed ledger, metadata and projections on one pool.
    pub fn postgres(pool: PgPool) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::from_stores(
            Arc::new(PostgresLedger::with_clock(pool.clone(), clock.clone())),
            Arc::new(PostgresMetadataStore::new(pool.clone())),
            Arc::new(PostgresProjectionStore::new(pool)),
            clock,
        )
    }

    pub fn from_stores(
        ledger: Arc<dyn EventLedger>,
        metadata: Arc<dyn MetadataStore>,
        projections: Arc<dyn ProjectionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = ServiceConfig::default();
        Self {
            ledger,
            metadata,
            projections,
            clock,
            pipeline: defaults.pipeline,
            delivery_timeout: defaults.delivery_timeout,
            replay_max_events: defaults.replay_max_events,
            channel_deliverer: None,
            handlers: Vec::new(),
        }
    }

    /// Take pipeline, delivery and replay knobs from `config`.
    pub fn with_config(mut self, config: &ServiceConfig) -> Self {
        self.pipeline = config.pipeline.clone();
        self.delivery_timeout = config.delivery_timeout;
        self.replay_max_events = config.replay_max_events;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Transport for `channel` subscriptions. Defaults to an in-process bus.
    pub fn with_channel_deliverer(mut self, deliverer: Arc<dyn Deliverer>) -> Self {
        self.channel_deliverer = Some(deliverer);
        self
    }

    /// Bind a custom processor handler by name. The processor itself is
    /// registered separately (through the API or [`EventService::create_processor`]).
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn Processor>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    pub async fn build(self) -> Result<EventService, ServiceError> {
        let clock = self.clock;
        let processors = Arc::new(ProcessorRegistry::new(self.metadata.clone()));
        let subscriptions = Arc::new(SubscriptionRegistry::new(self.metadata));
        processors.refresh().await?;
        subscriptions.refresh().await?;

        let projections = Arc::new(ProjectionEngine::with_default_folds(
            self.projections,
            clock.clone(),
        ));

        let channel_bus = Arc::new(InMemoryEventBus::<DeliveryEnvelope>::new());
        let channel: Arc<dyn Deliverer> = match self.channel_deliverer {
            Some(deliverer) => deliverer,
            None => Arc::new(BusDeliverer::new(channel_bus.clone())),
        };
        let mut routing = RoutingDeliverer::new(channel);
        match WebhookDeliverer::new(self.delivery_timeout) {
            Ok(webhooks) => routing = routing.with_webhooks(Arc::new(webhooks)),
            Err(e) => warn!(error = %e, "webhook transport unavailable; webhook deliveries will fail"),
        }
        let deliveries = Arc::new(DeliveryLog::default());

        processors.bind_kind(
            ProcessorKind::Projection,
            Arc::new(ProjectionProcessor::new(projections.clone())),
        );
        processors.bind_kind(
            ProcessorKind::Delivery,
            Arc::new(DeliveryProcessor::new(
                subscriptions.clone(),
                Arc::new(routing),
                deliveries.clone(),
                clock.clone(),
            )),
        );
        for (name, handler) in self.handlers {
            processors.bind_named(name, handler);
        }

        let now = clock.now();
        processors
            .ensure_registered(
                NewProcessor::new(PROJECTION_PROCESSOR, ProcessorKind::Projection).with_priority(10),
                now,
            )
            .await?;
        processors
            .ensure_registered(
                NewProcessor::new(DELIVERY_PROCESSOR, ProcessorKind::Delivery).with_priority(100),
                now,
            )
            .await?;

        let dispatcher = Arc::new(Dispatcher::new(processors.clone()));
        let pipeline = Arc::new(Pipeline::new(
            self.ledger.clone(),
            dispatcher.clone(),
            self.pipeline,
            clock.clone(),
        ));
        let replay = ReplayEngine::new(
            self.ledger.clone(),
            dispatcher,
            subscriptions.clone(),
            clock.clone(),
            self.replay_max_events,
        );

        info!(
            processors = processors.list().await.len(),
            subscriptions = subscriptions.list().await.len(),
            "event service ready"
        );

        Ok(EventService {
            ledger: self.ledger,
            processors,
            subscriptions,
            projections,
            deliveries,
            channel_bus,
            pipeline,
            replay,
            clock,
        })
    }
}

pub struct EventService {
    ledger: Arc<dyn EventLedger>,
    processors: Arc<ProcessorRegistry>,
    subscriptions: Arc<SubscriptionRegistry>,
    projections: Arc<ProjectionEngine>,
    deliveries: Arc<DeliveryLog>,
    channel_bus: Arc<InMemoryEventBus<DeliveryEnvelope>>,
    pipeline: Arc<Pipeline>,
    replay: ReplayEngine,
    clock: Arc<dyn Clock>,
}

impl EventService {
    // ---- ingestion ----

    /// Validate and append. Acknowledges the append only, not processing.
    pub async fn create(&self, event: NewEvent) -> Result<Event, ServiceError> {
        event.validate()?;
        let stored = self.ledger.append(event).await?;
        info!(event_id = %stored.event_id, event_type = %stored.event_type, "event stored");
        Ok(stored)
    }

    /// Per-item `create`; one bad item does not stop the rest.
    pub async fn create_batch(&self, events: Vec<NewEvent>) -> Vec<BatchItem> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.create(event).await);
        }
        results
    }

    // ---- queries ----

    pub async fn get(&self, event_id: EventId) -> Result<Event, ServiceError> {
        self.ledger
            .get(event_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("event {event_id} not found")))
    }

    pub async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, ServiceError> {
        if let (Some(after), Some(before)) = (filter.created_after, filter.created_before) {
            if after > before {
                return Err(ServiceError::Validation(
                    "created_after is later than created_before".to_string(),
                ));
            }
        }
        Ok(self.ledger.query(filter, pagination).await?)
    }

    /// Audit rows for one event, oldest first.
    pub async fn results(&self, event_id: EventId) -> Result<Vec<ProcessingResult>, ServiceError> {
        self.get(event_id).await?;
        Ok(self.ledger.results_for(event_id).await?)
    }

    pub async fn get_stream(&self, stream_id: &StreamId) -> Result<StreamView, ServiceError> {
        let stream = self
            .ledger
            .get_stream(stream_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("stream {stream_id} not found")))?;
        let events = self.ledger.load_stream(stream_id).await?;
        Ok(StreamView { stream, events })
    }

    // ---- projections ----

    pub async fn get_projection(
        &self,
        entity_type: &str,
        entity_id: &str,
        projection_name: &str,
    ) -> Result<EventProjection, ServiceError> {
        let key = ProjectionKey::new(entity_type, entity_id, projection_name);
        self.projections.get(&key).await?.ok_or_else(|| {
            ServiceError::NotFound(format!(
                "projection {projection_name} for {entity_type}:{entity_id} not found"
            ))
        })
    }

    pub async fn list_projections(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EventProjection>, ServiceError> {
        Ok(self.projections.list(entity_type, entity_id).await?)
    }

    /// Reset and refold every projection of one entity from its stream.
    pub async fn rebuild_projections(
        &self,
        stream_id: &StreamId,
    ) -> Result<Vec<EventProjection>, ServiceError> {
        let events = self.ledger.load_stream(stream_id).await?;
        if events.is_empty() {
            return Err(ServiceError::NotFound(format!("stream {stream_id} not found")));
        }
        let rebuilt = self.projections.rebuild(stream_id, &events).await?;
        info!(stream_id = %stream_id, events = events.len(), "projections rebuilt");
        Ok(rebuilt)
    }

    // ---- subscriptions ----

    pub async fn create_subscription(
        &self,
        subscriber_name: impl Into<String>,
        filters: EventMatcher,
        target: DeliveryTarget,
    ) -> Result<SubscriptionDescriptor, ServiceError> {
        Ok(self
            .subscriptions
            .create(subscriber_name, filters, target, self.clock.now())
            .await?)
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionDescriptor> {
        self.subscriptions.list().await
    }

    pub async fn get_subscription(
        &self,
        subscriber_name: &str,
    ) -> Result<SubscriptionDescriptor, ServiceError> {
        self.subscriptions.get(subscriber_name).await.ok_or_else(|| {
            ServiceError::NotFound(format!("subscription {subscriber_name:?} not found"))
        })
    }

    pub async fn delete_subscription(&self, subscriber_name: &str) -> Result<(), ServiceError> {
        Ok(self.subscriptions.delete(subscriber_name).await?)
    }

    pub async fn set_subscription_enabled(
        &self,
        subscriber_name: &str,
        enabled: bool,
    ) -> Result<SubscriptionDescriptor, ServiceError> {
        Ok(self
            .subscriptions
            .set_enabled(subscriber_name, enabled, self.clock.now())
            .await?)
    }

    /// Recorded delivery attempts for one subscriber, oldest first.
    pub async fn deliveries(
        &self,
        subscriber_name: &str,
    ) -> Result<Vec<DeliveryAttempt>, ServiceError> {
        self.get_subscription(subscriber_name).await?;
        Ok(self.deliveries.for_subscriber(subscriber_name))
    }

    /// In-process transport for `channel` subscriptions (when no other
    /// channel transport was configured).
    pub fn channel_bus(&self) -> &Arc<InMemoryEventBus<DeliveryEnvelope>> {
        &self.channel_bus
    }

    // ---- processors ----

    pub async fn create_processor(
        &self,
        request: NewProcessor,
    ) -> Result<ProcessorDescriptor, ServiceError> {
        Ok(self.processors.create(request, self.clock.now()).await?)
    }

    pub async fn list_processors(&self) -> Vec<ProcessorDescriptor> {
        self.processors.list().await
    }

    pub async fn set_processor_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<ProcessorDescriptor, ServiceError> {
        Ok(self
            .processors
            .set_enabled(name, enabled, self.clock.now())
            .await?)
    }

    /// Bind a handler for a named processor at runtime.
    pub fn bind_handler(&self, name: impl Into<String>, handler: Arc<dyn Processor>) {
        self.processors.bind_named(name, handler);
    }

    // ---- replay & pipeline ----

    pub async fn replay(&self, request: &ReplayRequest) -> Result<ReplaySummary, ServiceError> {
        Ok(self.replay.replay(request).await?)
    }

    pub async fn run_pipeline_cycle(&self) -> Result<CycleReport, ServiceError> {
        Ok(self.pipeline.run_cycle().await?)
    }

    /// Cycles until idle, for tests and tooling.
    pub async fn drain(&self, max_cycles: usize) -> Result<CycleReport, ServiceError> {
        Ok(self.pipeline.run_until_idle(max_cycles).await?)
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn spawn_pipeline(&self) -> PipelineHandle {
        self.pipeline.clone().spawn()
    }
}
