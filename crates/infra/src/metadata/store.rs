use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use eventhub_events::{ProcessorDescriptor, SubscriptionDescriptor};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("corrupt metadata row: {0}")]
    Corrupt(String),
}

/// Write-through backing for the processor and subscription registries.
///
/// Saves are upserts keyed by name; the registries enforce uniqueness on
/// create before they get here.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load_processors(&self) -> Result<Vec<ProcessorDescriptor>, MetadataError>;

    async fn save_processor(&self, processor: &ProcessorDescriptor) -> Result<(), MetadataError>;

    async fn load_subscriptions(&self) -> Result<Vec<SubscriptionDescriptor>, MetadataError>;

    async fn save_subscription(
        &self,
        subscription: &SubscriptionDescriptor,
    ) -> Result<(), MetadataError>;

    /// Returns whether a row was removed.
    async fn delete_subscription(&self, subscriber_name: &str) -> Result<bool, MetadataError>;
}

#[async_trait]
impl<S> MetadataStore for Arc<S>
where
    S: MetadataStore + ?Sized,
{
    async fn load_processors(&self) -> Result<Vec<ProcessorDescriptor>, MetadataError> {
        (**self).load_processors().await
    }

    async fn save_processor(&self, processor: &ProcessorDescriptor) -> Result<(), MetadataError> {
        (**self).save_processor(processor).await
    }

    async fn load_subscriptions(&self) -> Result<Vec<SubscriptionDescriptor>, MetadataError> {
        (**self).load_subscriptions().await
    }

    async fn save_subscription(
        &self,
        subscription: &SubscriptionDescriptor,
    ) -> Result<(), MetadataError> {
        (**self).save_subscription(subscription).await
    }

    async fn delete_subscription(&self, subscriber_name: &str) -> Result<bool, MetadataError> {
        (**self).delete_subscription(subscriber_name).await
    }
}

#[derive(Debug, Default)]
struct Tables {
    processors: HashMap<String, ProcessorDescriptor>,
    subscriptions: HashMap<String, SubscriptionDescriptor>,
}

/// In-memory metadata store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    tables: RwLock<Tables>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> MetadataError {
    MetadataError::StorageUnavailable("metadata lock poisoned".to_string())
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load_processors(&self) -> Result<Vec<ProcessorDescriptor>, MetadataError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.processors.values().cloned().collect())
    }

    async fn save_processor(&self, processor: &ProcessorDescriptor) -> Result<(), MetadataError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables
            .processors
            .insert(processor.name.clone(), processor.clone());
        Ok(())
    }

    async fn load_subscriptions(&self) -> Result<Vec<SubscriptionDescriptor>, MetadataError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.subscriptions.values().cloned().collect())
    }

    async fn save_subscription(
        &self,
        subscription: &SubscriptionDescriptor,
    ) -> Result<(), MetadataError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables
            .subscriptions
            .insert(subscription.subscriber_name.clone(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, subscriber_name: &str) -> Result<bool, MetadataError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        Ok(tables.subscriptions.remove(subscriber_name).is_some())
    }
}
