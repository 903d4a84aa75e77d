//! Postgres-backed registry metadata (`event_processors`, `event_subscriptions`).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use eventhub_core::SubscriptionId;
use eventhub_events::{EventMatcher, ProcessorDescriptor, SubscriptionDescriptor};

use super::store::{MetadataError, MetadataStore};

#[derive(Debug, Clone)]
pub struct PostgresMetadataStore {
    pool: Arc<PgPool>,
}

impl PostgresMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    #[instrument(skip(self), err)]
    async fn load_processors(&self) -> Result<Vec<ProcessorDescriptor>, MetadataError> {
        let rows = sqlx::query(
            r#"
            SELECT name, kind, enabled, priority, filters, error_count, last_error,
                created_at, updated_at
            FROM event_processors
            ORDER BY priority ASC, name ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_processors", e))?;
        rows.iter().map(decode_processor).collect()
    }

    #[instrument(skip(self, processor), fields(name = %processor.name), err)]
    async fn save_processor(&self, processor: &ProcessorDescriptor) -> Result<(), MetadataError> {
        let filters = to_json(&processor.filters)?;
        sqlx::query(
            r#"
            INSERT INTO event_processors (
                name, kind, enabled, priority, filters, error_count, last_error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (name) DO UPDATE SET
                kind = EXCLUDED.kind,
                enabled = EXCLUDED.enabled,
                priority = EXCLUDED.priority,
                filters = EXCLUDED.filters,
                error_count = EXCLUDED.error_count,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&processor.name)
        .bind(processor.kind.as_str())
        .bind(processor.enabled)
        .bind(processor.priority)
        .bind(filters)
        .bind(processor.error_count as i64)
        .bind(processor.last_error.as_deref())
        .bind(processor.created_at)
        .bind(processor.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_processor", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_subscriptions(&self) -> Result<Vec<SubscriptionDescriptor>, MetadataError> {
        let rows = sqlx::query(
            r#"
            SELECT subscriber_name, subscription_id, filters, target, enabled,
                created_at, updated_at
            FROM event_subscriptions
            ORDER BY subscriber_name ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_subscriptions", e))?;
        rows.iter().map(decode_subscription).collect()
    }

    #[instrument(skip(self, subscription), fields(subscriber = %subscription.subscriber_name), err)]
    async fn save_subscription(
        &self,
        subscription: &SubscriptionDescriptor,
    ) -> Result<(), MetadataError> {
        let filters = to_json(&subscription.filters)?;
        let target = to_json(&subscription.target)?;
        sqlx::query(
            r#"
            INSERT INTO event_subscriptions (
                subscriber_name, subscription_id, filters, target, enabled,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (subscriber_name) DO UPDATE SET
                filters = EXCLUDED.filters,
                target = EXCLUDED.target,
                enabled = EXCLUDED.enabled,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&subscription.subscriber_name)
        .bind(subscription.subscription_id.as_uuid())
        .bind(filters)
        .bind(target)
        .bind(subscription.enabled)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_subscription", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_subscription(&self, subscriber_name: &str) -> Result<bool, MetadataError> {
        let done = sqlx::query("DELETE FROM event_subscriptions WHERE subscriber_name = $1")
            .bind(subscriber_name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_subscription", e))?;
        Ok(done.rows_affected() > 0)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, MetadataError> {
    serde_json::to_value(value).map_err(|e| MetadataError::Corrupt(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(
    row: &PgRow,
    column: &str,
) -> Result<T, MetadataError> {
    let value: serde_json::Value = row
        .try_get(column)
        .map_err(|e| MetadataError::Corrupt(format!("{column}: {e}")))?;
    serde_json::from_value(value).map_err(|e| MetadataError::Corrupt(format!("{column}: {e}")))
}

fn decode_processor(row: &PgRow) -> Result<ProcessorDescriptor, MetadataError> {
    let corrupt = |e: sqlx::Error| MetadataError::Corrupt(format!("event_processors row: {e}"));
    let kind: String = row.try_get("kind").map_err(corrupt)?;
    let error_count: i64 = row.try_get("error_count").map_err(corrupt)?;
    let filters: EventMatcher = from_json(row, "filters")?;

    Ok(ProcessorDescriptor {
        name: row.try_get("name").map_err(corrupt)?,
        kind: kind
            .parse()
            .map_err(|e: eventhub_core::DomainError| MetadataError::Corrupt(e.to_string()))?,
        enabled: row.try_get("enabled").map_err(corrupt)?,
        priority: row.try_get("priority").map_err(corrupt)?,
        filters,
        error_count: error_count.max(0) as u64,
        last_error: row.try_get("last_error").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

fn decode_subscription(row: &PgRow) -> Result<SubscriptionDescriptor, MetadataError> {
    let corrupt = |e: sqlx::Error| MetadataError::Corrupt(format!("event_subscriptions row: {e}"));
    let id: Uuid = row.try_get("subscription_id").map_err(corrupt)?;

    Ok(SubscriptionDescriptor {
        subscription_id: SubscriptionId::from_uuid(id),
        subscriber_name: row.try_get("subscriber_name").map_err(corrupt)?,
        filters: from_json(row, "filters")?,
        target: from_json(row, "target")?,
        enabled: row.try_get("enabled").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> MetadataError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            MetadataError::Corrupt(format!("{operation}: {err}"))
        }
        other => MetadataError::StorageUnavailable(format!("sqlx error in {operation}: {other}")),
    }
}
