use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use eventhub_events::{EventProjection, ProjectionKey};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("projection store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("corrupt projection row: {0}")]
    Corrupt(String),

    #[error("unknown projection: {0}")]
    UnknownProjection(String),
}

/// Persistence for projection rows, keyed by [`ProjectionKey`].
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn load(&self, key: &ProjectionKey) -> Result<Option<EventProjection>, ProjectionError>;

    async fn save(&self, projection: &EventProjection) -> Result<(), ProjectionError>;

    /// Every projection of one entity, ordered by name.
    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EventProjection>, ProjectionError>;

    /// Drop every projection of one entity. Returns how many rows went.
    async fn delete_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<u64, ProjectionError>;
}

#[async_trait]
impl<S> ProjectionStore for Arc<S>
where
    S: ProjectionStore + ?Sized,
{
    async fn load(&self, key: &ProjectionKey) -> Result<Option<EventProjection>, ProjectionError> {
        (**self).load(key).await
    }

    async fn save(&self, projection: &EventProjection) -> Result<(), ProjectionError> {
        (**self).save(projection).await
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EventProjection>, ProjectionError> {
        (**self).list_for_entity(entity_type, entity_id).await
    }

    async fn delete_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<u64, ProjectionError> {
        (**self).delete_for_entity(entity_type, entity_id).await
    }
}

/// In-memory projection store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    rows: RwLock<BTreeMap<ProjectionKey, EventProjection>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ProjectionError {
    ProjectionError::StorageUnavailable("projection lock poisoned".to_string())
}

fn entity_matches(key: &ProjectionKey, entity_type: &str, entity_id: &str) -> bool {
    key.entity_type == entity_type && key.entity_id == entity_id
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn load(&self, key: &ProjectionKey) -> Result<Option<EventProjection>, ProjectionError> {
        Ok(self.rows.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    async fn save(&self, projection: &EventProjection) -> Result<(), ProjectionError> {
        self.rows
            .write()
            .map_err(|_| poisoned())?
            .insert(projection.key(), projection.clone());
        Ok(())
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EventProjection>, ProjectionError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .iter()
            .filter(|(k, _)| entity_matches(k, entity_type, entity_id))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn delete_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<u64, ProjectionError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let before = rows.len();
        rows.retain(|k, _| !entity_matches(k, entity_type, entity_id));
        Ok((before - rows.len()) as u64)
    }
}
