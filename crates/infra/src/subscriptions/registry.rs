//! Subscription registry: a read-mostly map over the metadata store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use eventhub_events::{DeliveryTarget, Event, EventMatcher, SubscriptionDescriptor};

use crate::metadata::{MetadataError, MetadataStore};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] MetadataError),
}

pub struct SubscriptionRegistry {
    store: Arc<dyn MetadataStore>,
    entries: RwLock<HashMap<String, SubscriptionDescriptor>>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn refresh(&self) -> Result<usize, SubscriptionError> {
        let loaded = self.store.load_subscriptions().await?;
        let mut entries = self.entries.write().await;
        *entries = loaded
            .into_iter()
            .map(|s| (s.subscriber_name.clone(), s))
            .collect();
        Ok(entries.len())
    }

    pub async fn create(
        &self,
        subscriber_name: impl Into<String>,
        filters: EventMatcher,
        target: DeliveryTarget,
        at: DateTime<Utc>,
    ) -> Result<SubscriptionDescriptor, SubscriptionError> {
        let descriptor = SubscriptionDescriptor::new(subscriber_name, filters, target, at);
        descriptor
            .validate()
            .map_err(|e| SubscriptionError::Validation(e.to_string()))?;

        let mut entries = self.entries.write().await;
        if entries.contains_key(&descriptor.subscriber_name) {
            return Err(SubscriptionError::Conflict(format!(
                "subscription {:?} already exists",
                descriptor.subscriber_name
            )));
        }
        self.store.save_subscription(&descriptor).await?;
        entries.insert(descriptor.subscriber_name.clone(), descriptor.clone());
        info!(subscriber = %descriptor.subscriber_name, "subscription created");
        Ok(descriptor)
    }

    pub async fn delete(&self, subscriber_name: &str) -> Result<(), SubscriptionError> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(subscriber_name) {
            return Err(SubscriptionError::NotFound(format!(
                "subscription {subscriber_name:?} not found"
            )));
        }
        self.store.delete_subscription(subscriber_name).await?;
        entries.remove(subscriber_name);
        info!(subscriber = %subscriber_name, "subscription deleted");
        Ok(())
    }

    pub async fn set_enabled(
        &self,
        subscriber_name: &str,
        enabled: bool,
        at: DateTime<Utc>,
    ) -> Result<SubscriptionDescriptor, SubscriptionError> {
        let mut entries = self.entries.write().await;
        let mut updated = entries.get(subscriber_name).cloned().ok_or_else(|| {
            SubscriptionError::NotFound(format!("subscription {subscriber_name:?} not found"))
        })?;
        updated.enabled = enabled;
        updated.updated_at = at;
        self.store.save_subscription(&updated).await?;
        entries.insert(updated.subscriber_name.clone(), updated.clone());
        Ok(updated)
    }

    /// All subscriptions, by name.
    pub async fn list(&self) -> Vec<SubscriptionDescriptor> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.subscriber_name.cmp(&b.subscriber_name));
        all
    }

    pub async fn get(&self, subscriber_name: &str) -> Option<SubscriptionDescriptor> {
        self.entries.read().await.get(subscriber_name).cloned()
    }

    /// Enabled subscriptions whose filters accept `event`, by name.
    pub async fn matching(&self, event: &Event) -> Vec<SubscriptionDescriptor> {
        let mut selected: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|s| s.accepts(event))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.subscriber_name.cmp(&b.subscriber_name));
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;

    fn topic(t: &str) -> DeliveryTarget {
        DeliveryTarget::Channel { topic: t.into() }
    }

    #[tokio::test]
    async fn create_delete_round() {
        let registry = SubscriptionRegistry::new(Arc::new(InMemoryMetadataStore::new()));
        let now = Utc::now();
        registry
            .create("billing", EventMatcher::any(), topic("billing"), now)
            .await
            .unwrap();

        let dup = registry
            .create("billing", EventMatcher::any(), topic("other"), now)
            .await
            .unwrap_err();
        assert!(matches!(dup, SubscriptionError::Conflict(_)));

        registry.delete("billing").await.unwrap();
        assert!(registry.list().await.is_empty());
        assert!(matches!(
            registry.delete("billing").await.unwrap_err(),
            SubscriptionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn invalid_targets_are_rejected() {
        let registry = SubscriptionRegistry::new(Arc::new(InMemoryMetadataStore::new()));
        let err = registry
            .create("", EventMatcher::any(), topic("x"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::Validation(_)));
    }

    #[tokio::test]
    async fn refresh_reloads_from_the_store() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let first = SubscriptionRegistry::new(store.clone());
        first
            .create("audit", EventMatcher::any(), topic("audit"), Utc::now())
            .await
            .unwrap();
        first.set_enabled("audit", false, Utc::now()).await.unwrap();

        let second = SubscriptionRegistry::new(store);
        assert_eq!(second.refresh().await.unwrap(), 1);
        assert!(!second.get("audit").await.unwrap().enabled);
    }
}
