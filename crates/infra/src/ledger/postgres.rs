//! Postgres-backed ledger.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | `LedgerError` |
//! |------------|------|---------------|
//! | unique violation on `events.event_id` | `23505` | `DuplicateEvent` |
//! | foreign key violation | `23503` | `NotFound` |
//! | row decode failure | n/a | `Corrupt` |
//! | anything else (pool closed, IO, timeouts) | n/a | `StorageUnavailable` |
//!
//! Appends take a transaction-scoped advisory lock so `sequence_timestamp`
//! stays strictly increasing across concurrent writers. Claims use
//! `FOR UPDATE SKIP LOCKED`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use eventhub_core::{Clock, EventId, ResultId, SystemClock};
use eventhub_events::{
    Event, EventStatus, EventStream, NewEvent, ProcessingResult, ResultStatus, StatusUpdate,
    StreamId,
};

use super::query::{EventFilter, EventQueryResult, Pagination, SortOrder};
use super::r#trait::{EventLedger, LedgerError, check_transition};

const EVENT_COLUMNS: &str = r#"
    event_id, position, event_type, source, category, entity_type, entity_id,
    correlation_id, payload, metadata, status, retry_count, error_message,
    sequence_timestamp, created_at, processed_at
"#;

/// Arbitrary constant for `pg_advisory_xact_lock` around sequence assignment.
const SEQUENCE_LOCK_KEY: i64 = 0x6576_656e_7468_7562;

/// Postgres-backed append-only ledger.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
    clock: Arc<dyn Clock>,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: Arc::new(pool),
            clock,
        }
    }
}

#[async_trait]
impl EventLedger for PostgresLedger {
    #[instrument(
        skip(self, event),
        fields(event_type = %event.event_type, sequence_timestamp),
        err
    )]
    async fn append(&self, event: NewEvent) -> Result<Event, LedgerError> {
        let now = self.clock.now();
        let mut stored = event.into_event(now, now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SEQUENCE_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("sequence_lock", e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO events (
                event_id, event_type, source, category, entity_type, entity_id,
                correlation_id, payload, metadata, status, retry_count,
                sequence_timestamp, created_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', 0,
                GREATEST($10, COALESCE(MAX(sequence_timestamp) + INTERVAL '1 microsecond', $10)),
                $10
            FROM events
            RETURNING sequence_timestamp
            "#,
        )
        .bind(stored.event_id.as_uuid())
        .bind(&stored.event_type)
        .bind(stored.source.as_str())
        .bind(stored.category.as_str())
        .bind(stored.entity_type.as_deref())
        .bind(stored.entity_id.as_deref())
        .bind(stored.correlation_id.as_deref())
        .bind(&stored.payload)
        .bind(&stored.metadata)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::DuplicateEvent(stored.event_id)
            } else {
                map_sqlx_error("insert_event", e)
            }
        })?;

        stored.sequence_timestamp = row
            .try_get("sequence_timestamp")
            .map_err(|e| LedgerError::Corrupt(format!("sequence_timestamp: {e}")))?;

        if let (Some(entity_type), Some(entity_id)) = (&stored.entity_type, &stored.entity_id) {
            sqlx::query(
                r#"
                INSERT INTO event_streams (entity_type, entity_id, event_ids, version, created_at, updated_at)
                VALUES ($1, $2, ARRAY[$3]::uuid[], 1, $4, $4)
                ON CONFLICT (entity_type, entity_id)
                DO UPDATE SET
                    event_ids = array_append(event_streams.event_ids, $3),
                    version = event_streams.version + 1,
                    updated_at = $4
                "#,
            )
            .bind(entity_type)
            .bind(entity_id)
            .bind(stored.event_id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("append_stream", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record(
            "sequence_timestamp",
            tracing::field::display(stored.sequence_timestamp),
        );
        Ok(stored)
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn get(&self, event_id: EventId) -> Result<Option<Event>, LedgerError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_event", e))?;
        row.map(|r| decode_event(&r).map(|(_, e)| e)).transpose()
    }

    #[instrument(skip(self, ids), fields(requested = ids.len()), err)]
    async fn get_many(&self, ids: &[EventId]) -> Result<Vec<Event>, LedgerError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ANY($1) \
             ORDER BY sequence_timestamp ASC, position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(&uuids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_many", e))?;
        decode_events(&rows)
    }

    #[instrument(skip(self, filter), fields(limit = pagination.limit, offset = pagination.offset), err)]
    async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, LedgerError> {
        const WHERE: &str = r#"
            WHERE ($1::text IS NULL OR entity_type = $1)
                AND ($2::text IS NULL OR entity_id = $2)
                AND ($3::text IS NULL OR event_type = $3)
                AND (cardinality($4::text[]) = 0 OR event_type = ANY($4))
                AND ($5::text IS NULL OR category = $5)
                AND ($6::text IS NULL OR source = $6)
                AND ($7::text IS NULL OR status = $7)
                AND ($8::text IS NULL OR correlation_id = $8)
                AND ($9::timestamptz IS NULL OR created_at >= $9)
                AND ($10::timestamptz IS NULL OR created_at <= $10)
                AND ($11::int IS NULL OR retry_count < $11)
                AND ($12::int IS NULL OR retry_count >= $12)
        "#;
        let order = match filter.order {
            SortOrder::NewestFirst => "ORDER BY created_at DESC, position DESC",
            SortOrder::OldestFirst => "ORDER BY created_at ASC, position ASC",
        };

        let count_sql = format!("SELECT COUNT(*) AS total FROM events {WHERE}");
        let page_sql =
            format!("SELECT {EVENT_COLUMNS} FROM events {WHERE} {order} LIMIT $13 OFFSET $14");

        let retry_below = filter.retry_count_below.map(|n| n as i32);
        let retry_at_least = filter.retry_count_at_least.map(|n| n as i32);

        let count_row = sqlx::query(&count_sql)
            .bind(filter.entity_type.as_deref())
            .bind(filter.entity_id.as_deref())
            .bind(filter.event_type.as_deref())
            .bind(&filter.event_types)
            .bind(filter.category.map(|c| c.as_str()))
            .bind(filter.source.map(|s| s.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.correlation_id.as_deref())
            .bind(filter.created_after)
            .bind(filter.created_before)
            .bind(retry_below)
            .bind(retry_at_least)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_events", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| LedgerError::Corrupt(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(&page_sql)
            .bind(filter.entity_type.as_deref())
            .bind(filter.entity_id.as_deref())
            .bind(filter.event_type.as_deref())
            .bind(&filter.event_types)
            .bind(filter.category.map(|c| c.as_str()))
            .bind(filter.source.map(|s| s.as_str()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.correlation_id.as_deref())
            .bind(filter.created_after)
            .bind(filter.created_before)
            .bind(retry_below)
            .bind(retry_at_least)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_events", e))?;

        Ok(EventQueryResult::new(
            decode_events(&rows)?,
            total.max(0) as u64,
            pagination,
        ))
    }

    #[instrument(skip(self), fields(stream_id = %stream_id), err)]
    async fn get_stream(&self, stream_id: &StreamId) -> Result<Option<EventStream>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT event_ids, version, created_at, updated_at
            FROM event_streams
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(stream_id.entity_type())
        .bind(stream_id.entity_id())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_stream", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| LedgerError::Corrupt(format!("event_streams row: {e}"));
        let event_ids: Vec<Uuid> = row.try_get("event_ids").map_err(decode)?;
        let version: i64 = row.try_get("version").map_err(decode)?;
        Ok(Some(EventStream {
            stream_id: stream_id.clone(),
            event_ids: event_ids.into_iter().map(EventId::from_uuid).collect(),
            version: version.max(0) as u64,
            created_at: row.try_get("created_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        }))
    }

    #[instrument(skip(self), fields(stream_id = %stream_id, event_count), err)]
    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<Event>, LedgerError> {
        // Version order is the order of `event_streams.event_ids`.
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            JOIN (
                SELECT ref.id, ref.ord
                FROM event_streams s,
                    unnest(s.event_ids) WITH ORDINALITY AS ref(id, ord)
                WHERE s.entity_type = $1 AND s.entity_id = $2
            ) refs ON events.event_id = refs.id
            ORDER BY refs.ord ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(stream_id.entity_type())
            .bind(stream_id.entity_id())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_stream", e))?;
        let events = decode_events(&rows)?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self), fields(claimed), err)]
    async fn claim_pending(&self, limit: usize) -> Result<Vec<Event>, LedgerError> {
        let sql = format!(
            r#"
            UPDATE events SET status = 'processing', claimed_at = $2
            WHERE event_id IN (
                SELECT event_id FROM events
                WHERE status = 'pending'
                ORDER BY created_at ASC, position ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(self.clock.now())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_pending", e))?;

        let mut claimed = rows
            .iter()
            .map(decode_event)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|(position, e)| (e.created_at, *position));
        Span::current().record("claimed", claimed.len());
        Ok(claimed.into_iter().map(|(_, e)| e).collect())
    }

    /// Rows claimed before the lease column existed have no `claimed_at` and
    /// count as expired.
    #[instrument(skip(self), fields(reclaimed), err)]
    async fn reclaim_expired(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<EventId>, LedgerError> {
        let rows = sqlx::query(
            r#"
            UPDATE events
            SET status = 'pending', claimed_at = NULL, processed_at = NULL
            WHERE status = 'processing'
              AND (claimed_at IS NULL OR claimed_at < $1)
            RETURNING event_id, position
            "#,
        )
        .bind(claimed_before)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reclaim_expired", e))?;

        let mut reclaimed = rows
            .iter()
            .map(|row| {
                let id: Uuid = row
                    .try_get("event_id")
                    .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
                let position: i64 = row
                    .try_get("position")
                    .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
                Ok((position, EventId::from_uuid(id)))
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;
        reclaimed.sort_unstable_by_key(|(position, _)| *position);
        Span::current().record("reclaimed", reclaimed.len());
        Ok(reclaimed.into_iter().map(|(_, id)| id).collect())
    }

    #[instrument(skip(self, update), fields(event_id = %event_id, from = %from, to = %update.status), err)]
    async fn transition(
        &self,
        event_id: EventId,
        from: EventStatus,
        update: StatusUpdate,
    ) -> Result<Event, LedgerError> {
        check_transition(event_id, from, update.status)?;
        let sql = format!(
            r#"
            UPDATE events
            SET status = $3, retry_count = $4, error_message = $5, processed_at = $6,
                claimed_at = NULL
            WHERE event_id = $1 AND status = $2
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .bind(from.as_str())
            .bind(update.status.as_str())
            .bind(update.retry_count as i32)
            .bind(update.error_message.as_deref())
            .bind(update.processed_at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transition", e))?;

        match row {
            Some(row) => decode_event(&row).map(|(_, e)| e),
            None => match self.get(event_id).await? {
                Some(current) => Err(LedgerError::StaleStatus {
                    event_id,
                    expected: from,
                    actual: current.status,
                }),
                None => Err(LedgerError::NotFound(event_id)),
            },
        }
    }

    #[instrument(
        skip(self, result),
        fields(event_id = %result.event_id, processor = %result.processor_name),
        err
    )]
    async fn record_result(&self, result: &ProcessingResult) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO processing_results (
                result_id, event_id, processor_name, status, message,
                duration_ms, processed_at, replay
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(result.result_id.as_uuid())
        .bind(result.event_id.as_uuid())
        .bind(&result.processor_name)
        .bind(result.status.as_str())
        .bind(result.message.as_deref())
        .bind(result.duration_ms as i64)
        .bind(result.processed_at)
        .bind(result.replay)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                LedgerError::NotFound(result.event_id)
            } else {
                map_sqlx_error("record_result", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn results_for(&self, event_id: EventId) -> Result<Vec<ProcessingResult>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT result_id, event_id, processor_name, status, message,
                duration_ms, processed_at, replay
            FROM processing_results
            WHERE event_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("results_for", e))?;

        rows.iter().map(decode_result).collect()
    }
}

fn decode_events(rows: &[PgRow]) -> Result<Vec<Event>, LedgerError> {
    rows.iter().map(|r| decode_event(r).map(|(_, e)| e)).collect()
}

/// Decode one `events` row into `(position, event)`.
fn decode_event(row: &PgRow) -> Result<(i64, Event), LedgerError> {
    let corrupt = |e: sqlx::Error| LedgerError::Corrupt(format!("events row: {e}"));
    let text = |col: &str| -> Result<String, LedgerError> { row.try_get(col).map_err(corrupt) };
    let invalid = |e: eventhub_core::DomainError| LedgerError::Corrupt(e.to_string());

    let event_id: Uuid = row.try_get("event_id").map_err(corrupt)?;
    let position: i64 = row.try_get("position").map_err(corrupt)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(corrupt)?;
    let payload: JsonValue = row.try_get("payload").map_err(corrupt)?;
    let metadata: JsonValue = row.try_get("metadata").map_err(corrupt)?;
    let processed_at: Option<DateTime<Utc>> = row.try_get("processed_at").map_err(corrupt)?;

    let event = Event {
        event_id: EventId::from_uuid(event_id),
        event_type: text("event_type")?,
        source: text("source")?.parse().map_err(invalid)?,
        category: text("category")?.parse().map_err(invalid)?,
        entity_type: row.try_get("entity_type").map_err(corrupt)?,
        entity_id: row.try_get("entity_id").map_err(corrupt)?,
        correlation_id: row.try_get("correlation_id").map_err(corrupt)?,
        payload,
        metadata,
        status: text("status")?.parse().map_err(invalid)?,
        retry_count: retry_count.max(0) as u32,
        error_message: row.try_get("error_message").map_err(corrupt)?,
        sequence_timestamp: row.try_get("sequence_timestamp").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        processed_at,
    };
    Ok((position, event))
}

fn decode_result(row: &PgRow) -> Result<ProcessingResult, LedgerError> {
    let corrupt = |e: sqlx::Error| LedgerError::Corrupt(format!("processing_results row: {e}"));
    let status: String = row.try_get("status").map_err(corrupt)?;
    let duration_ms: i64 = row.try_get("duration_ms").map_err(corrupt)?;
    let result_id: Uuid = row.try_get("result_id").map_err(corrupt)?;
    let event_id: Uuid = row.try_get("event_id").map_err(corrupt)?;

    Ok(ProcessingResult {
        result_id: ResultId::from_uuid(result_id),
        event_id: EventId::from_uuid(event_id),
        processor_name: row.try_get("processor_name").map_err(corrupt)?,
        status: ResultStatus::parse(&status)
            .ok_or_else(|| LedgerError::Corrupt(format!("unknown result status {status:?}")))?,
        message: row.try_get("message").map_err(corrupt)?,
        duration_ms: duration_ms.max(0) as u64,
        processed_at: row.try_get("processed_at").map_err(corrupt)?,
        replay: row.try_get("replay").map_err(corrupt)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

/// Everything that is not a decoding problem is reported as the store being
/// unavailable: the caller must not assume anything was committed.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            LedgerError::Corrupt(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => LedgerError::StorageUnavailable(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            LedgerError::StorageUnavailable(format!("connection pool closed in {operation}"))
        }
        other => LedgerError::StorageUnavailable(format!("sqlx error in {operation}: {other}")),
    }
}
