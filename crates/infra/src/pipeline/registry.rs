//! The processor registry: descriptors (persisted) plus bound handlers
//! (in-process).
//!
//! Descriptors are write-through to the [`MetadataStore`]; the in-memory map
//! is only updated after the store accepted the write.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use eventhub_events::{Event, EventMatcher, ProcessorDescriptor, ProcessorKind};

use super::processor::Processor;
use crate::metadata::{MetadataError, MetadataStore};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] MetadataError),
}

/// What a handler is bound to. A named binding beats a kind binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HandlerKey {
    Kind(ProcessorKind),
    Named(String),
}

/// A processor registration request.
#[derive(Debug, Clone)]
pub struct NewProcessor {
    pub name: String,
    pub kind: ProcessorKind,
    pub priority: i32,
    pub filters: EventMatcher,
    pub enabled: bool,
}

impl NewProcessor {
    pub fn new(name: impl Into<String>, kind: ProcessorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            priority: 0,
            filters: EventMatcher::any(),
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filters(mut self, filters: EventMatcher) -> Self {
        self.filters = filters;
        self
    }

    fn into_descriptor(self, at: DateTime<Utc>) -> ProcessorDescriptor {
        let mut descriptor =
            ProcessorDescriptor::new(self.name, self.kind, self.priority, self.filters, at);
        descriptor.enabled = self.enabled;
        descriptor
    }
}

pub struct ProcessorRegistry {
    store: Arc<dyn MetadataStore>,
    handlers: StdRwLock<HashMap<HandlerKey, Arc<dyn Processor>>>,
    entries: RwLock<HashMap<String, ProcessorDescriptor>>,
}

impl ProcessorRegistry {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            handlers: StdRwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Bind a handler for every processor of `kind` without a named binding.
    pub fn bind_kind(&self, kind: ProcessorKind, handler: Arc<dyn Processor>) {
        self.bind(HandlerKey::Kind(kind), handler);
    }

    /// Bind a handler for one processor name.
    pub fn bind_named(&self, name: impl Into<String>, handler: Arc<dyn Processor>) {
        self.bind(HandlerKey::Named(name.into()), handler);
    }

    fn bind(&self, key: HandlerKey, handler: Arc<dyn Processor>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(key, handler);
        }
    }

    fn handler_for(&self, descriptor: &ProcessorDescriptor) -> Option<Arc<dyn Processor>> {
        let handlers = self.handlers.read().ok()?;
        handlers
            .get(&HandlerKey::Named(descriptor.name.clone()))
            .or_else(|| handlers.get(&HandlerKey::Kind(descriptor.kind)))
            .cloned()
    }

    fn has_handler(&self, name: &str, kind: ProcessorKind) -> bool {
        self.handlers
            .read()
            .map(|h| {
                h.contains_key(&HandlerKey::Named(name.to_string()))
                    || h.contains_key(&HandlerKey::Kind(kind))
            })
            .unwrap_or(false)
    }

    /// Replace the in-memory view with what the store holds.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let loaded = self.store.load_processors().await?;
        let mut entries = self.entries.write().await;
        *entries = loaded.into_iter().map(|p| (p.name.clone(), p)).collect();
        Ok(entries.len())
    }

    pub async fn create(
        &self,
        request: NewProcessor,
        at: DateTime<Utc>,
    ) -> Result<ProcessorDescriptor, RegistryError> {
        let descriptor = request.into_descriptor(at);
        descriptor
            .validate()
            .map_err(|e| RegistryError::Validation(e.to_string()))?;
        if !self.has_handler(&descriptor.name, descriptor.kind) {
            return Err(RegistryError::Validation(format!(
                "no handler available for processor {:?} of type {}",
                descriptor.name, descriptor.kind
            )));
        }

        let mut entries = self.entries.write().await;
        if entries.contains_key(&descriptor.name) {
            return Err(RegistryError::Conflict(format!(
                "processor {:?} already registered",
                descriptor.name
            )));
        }
        self.store.save_processor(&descriptor).await?;
        entries.insert(descriptor.name.clone(), descriptor.clone());
        info!(processor = %descriptor.name, kind = %descriptor.kind, priority = descriptor.priority, "processor registered");
        Ok(descriptor)
    }

    /// Register `request` unless a processor of that name already exists.
    pub async fn ensure_registered(
        &self,
        request: NewProcessor,
        at: DateTime<Utc>,
    ) -> Result<ProcessorDescriptor, RegistryError> {
        if let Some(existing) = self.get(&request.name).await {
            return Ok(existing);
        }
        match self.create(request.clone(), at).await {
            Err(RegistryError::Conflict(_)) => self
                .get(&request.name)
                .await
                .ok_or_else(|| RegistryError::NotFound(format!("processor {:?}", request.name))),
            other => other,
        }
    }

    /// All descriptors, in dispatch order `(priority, name)`.
    pub async fn list(&self) -> Vec<ProcessorDescriptor> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        sort_for_dispatch(&mut all);
        all
    }

    pub async fn get(&self, name: &str) -> Option<ProcessorDescriptor> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn set_enabled(
        &self,
        name: &str,
        enabled: bool,
        at: DateTime<Utc>,
    ) -> Result<ProcessorDescriptor, RegistryError> {
        let mut entries = self.entries.write().await;
        let mut updated = entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("processor {name:?} not found")))?;
        updated.enabled = enabled;
        updated.updated_at = at;
        self.store.save_processor(&updated).await?;
        entries.insert(updated.name.clone(), updated.clone());
        info!(processor = %name, enabled, "processor toggled");
        Ok(updated)
    }

    /// Bump `error_count` and remember the message. Bookkeeping failures are
    /// logged, never surfaced to the dispatch that caused them.
    pub async fn record_failure(&self, name: &str, error: &str, at: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        let Some(mut updated) = entries.get(name).cloned() else {
            return;
        };
        updated.record_failure(error, at);
        match self.store.save_processor(&updated).await {
            Ok(()) => {
                entries.insert(updated.name.clone(), updated);
            }
            Err(e) => {
                warn!(processor = %name, error = %e, "failed to persist processor error count");
            }
        }
    }

    /// Enabled processors whose filters accept `event`, in dispatch order,
    /// each with its bound handler if any.
    pub async fn matching(
        &self,
        event: &Event,
    ) -> Vec<(ProcessorDescriptor, Option<Arc<dyn Processor>>)> {
        let mut selected: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|p| p.enabled && p.filters.matches(event))
            .cloned()
            .collect();
        sort_for_dispatch(&mut selected);
        selected
            .into_iter()
            .map(|p| {
                let handler = self.handler_for(&p);
                (p, handler)
            })
            .collect()
    }

    /// One descriptor with its handler, regardless of `enabled` or filters.
    pub async fn resolve(
        &self,
        name: &str,
    ) -> Option<(ProcessorDescriptor, Option<Arc<dyn Processor>>)> {
        let descriptor = self.get(name).await?;
        let handler = self.handler_for(&descriptor);
        Some((descriptor, handler))
    }
}

fn sort_for_dispatch(processors: &mut [ProcessorDescriptor]) {
    processors.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use crate::pipeline::processor::FnProcessor;
    use eventhub_events::{EventCategory, EventSource, NewEvent};
    use serde_json::json;

    fn registry() -> ProcessorRegistry {
        let registry = ProcessorRegistry::new(Arc::new(InMemoryMetadataStore::new()));
        registry.bind_kind(
            ProcessorKind::Custom,
            Arc::new(FnProcessor::new(|_, _| Ok(None))),
        );
        registry
    }

    fn event(event_type: &str) -> Event {
        let now = Utc::now();
        NewEvent::new(event_type, EventSource::Api, EventCategory::Domain, json!({}))
            .into_event(now, now)
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let registry = registry();
        let now = Utc::now();
        registry
            .create(NewProcessor::new("audit", ProcessorKind::Custom), now)
            .await
            .unwrap();
        let err = registry
            .create(NewProcessor::new("audit", ProcessorKind::Custom), now)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn kinds_without_handler_are_rejected() {
        let registry = registry();
        let err = registry
            .create(NewProcessor::new("proj", ProcessorKind::Projection), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[tokio::test]
    async fn matching_is_ordered_by_priority_then_name() {
        let registry = registry();
        let now = Utc::now();
        for (name, priority) in [("b", 5), ("a", 5), ("z", 1)] {
            registry
                .create(
                    NewProcessor::new(name, ProcessorKind::Custom).with_priority(priority),
                    now,
                )
                .await
                .unwrap();
        }
        registry
            .create(
                NewProcessor::new("orders-only", ProcessorKind::Custom)
                    .with_filters(EventMatcher::for_types(["order.created"])),
                now,
            )
            .await
            .unwrap();
        registry.set_enabled("b", false, now).await.unwrap();

        let names: Vec<_> = registry
            .matching(&event("user.created"))
            .await
            .into_iter()
            .map(|(p, h)| {
                assert!(h.is_some());
                p.name
            })
            .collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[tokio::test]
    async fn registrations_survive_a_refresh() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let first = ProcessorRegistry::new(store.clone());
        first.bind_kind(ProcessorKind::Custom, Arc::new(FnProcessor::new(|_, _| Ok(None))));
        first
            .create(NewProcessor::new("audit", ProcessorKind::Custom), Utc::now())
            .await
            .unwrap();
        first.record_failure("audit", "boom", Utc::now()).await;

        let second = ProcessorRegistry::new(store);
        assert_eq!(second.refresh().await.unwrap(), 1);
        let audit = second.get("audit").await.unwrap();
        assert_eq!(audit.error_count, 1);
        assert_eq!(audit.last_error.as_deref(), Some("boom"));
    }
}
