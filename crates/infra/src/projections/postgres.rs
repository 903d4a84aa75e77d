//! Postgres-backed projection rows (`event_projections`).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use eventhub_core::EventId;
use eventhub_events::{EventProjection, ProjectionKey};

use super::store::{ProjectionError, ProjectionStore};

#[derive(Debug, Clone)]
pub struct PostgresProjectionStore {
    pool: Arc<PgPool>,
}

impl PostgresProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ProjectionStore for PostgresProjectionStore {
    #[instrument(skip(self), err)]
    async fn load(&self, key: &ProjectionKey) -> Result<Option<EventProjection>, ProjectionError> {
        let row = sqlx::query(
            r#"
            SELECT entity_type, entity_id, projection_name, state, version,
                last_event_id, last_sequence_timestamp, updated_at
            FROM event_projections
            WHERE entity_type = $1 AND entity_id = $2 AND projection_name = $3
            "#,
        )
        .bind(&key.entity_type)
        .bind(&key.entity_id)
        .bind(&key.projection_name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_projection", e))?;

        row.as_ref().map(decode_projection).transpose()
    }

    #[instrument(
        skip(self, projection),
        fields(
            entity_type = %projection.entity_type,
            entity_id = %projection.entity_id,
            projection = %projection.projection_name,
            version = projection.version
        ),
        err
    )]
    async fn save(&self, projection: &EventProjection) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO event_projections (
                entity_type, entity_id, projection_name, state, version,
                last_event_id, last_sequence_timestamp, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (entity_type, entity_id, projection_name) DO UPDATE SET
                state = EXCLUDED.state,
                version = EXCLUDED.version,
                last_event_id = EXCLUDED.last_event_id,
                last_sequence_timestamp = EXCLUDED.last_sequence_timestamp,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&projection.entity_type)
        .bind(&projection.entity_id)
        .bind(&projection.projection_name)
        .bind(&projection.state)
        .bind(projection.version as i64)
        .bind(projection.last_event_id.map(|id| *id.as_uuid()))
        .bind(projection.last_sequence_timestamp)
        .bind(projection.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_projection", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<EventProjection>, ProjectionError> {
        let rows = sqlx::query(
            r#"
            SELECT entity_type, entity_id, projection_name, state, version,
                last_event_id, last_sequence_timestamp, updated_at
            FROM event_projections
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY projection_name ASC
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_projections", e))?;

        rows.iter().map(decode_projection).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<u64, ProjectionError> {
        let done = sqlx::query(
            "DELETE FROM event_projections WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(entity_type)
        .bind(entity_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_projections", e))?;
        Ok(done.rows_affected())
    }
}

fn decode_projection(row: &PgRow) -> Result<EventProjection, ProjectionError> {
    let corrupt = |e: sqlx::Error| ProjectionError::Corrupt(format!("event_projections row: {e}"));
    let version: i64 = row.try_get("version").map_err(corrupt)?;
    let last_event_id: Option<Uuid> = row.try_get("last_event_id").map_err(corrupt)?;

    Ok(EventProjection {
        entity_type: row.try_get("entity_type").map_err(corrupt)?,
        entity_id: row.try_get("entity_id").map_err(corrupt)?,
        projection_name: row.try_get("projection_name").map_err(corrupt)?,
        state: row.try_get("state").map_err(corrupt)?,
        version: version.max(0) as u64,
        last_event_id: last_event_id.map(EventId::from_uuid),
        last_sequence_timestamp: row.try_get("last_sequence_timestamp").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ProjectionError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            ProjectionError::Corrupt(format!("{operation}: {err}"))
        }
        other => ProjectionError::StorageUnavailable(format!("sqlx error in {operation}: {other}")),
    }
}
