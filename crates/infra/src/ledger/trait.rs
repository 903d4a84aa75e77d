use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use eventhub_core::EventId;
use eventhub_events::{
    Event, EventStatus, EventStream, NewEvent, ProcessingResult, StatusUpdate, StreamId,
};

use super::query::{EventFilter, EventQueryResult, Pagination};

/// Ledger operation error.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The backing store could not complete the call. Nothing was committed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("event not found: {0}")]
    NotFound(EventId),

    #[error("event already exists: {0}")]
    DuplicateEvent(EventId),

    /// Compare-and-set on status lost: someone else moved the event first.
    #[error("event {event_id} is {actual}, expected {expected}")]
    StaleStatus {
        event_id: EventId,
        expected: EventStatus,
        actual: EventStatus,
    },

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// A stored row could not be decoded.
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Append-only store of events, plus the per-event audit trail.
///
/// - `append` assigns `created_at` and a `sequence_timestamp` that is strictly
///   increasing per ledger, starts the event `pending`, and extends the
///   entity's stream in the same atomic step.
/// - `transition` is the only write path for an existing event and touches
///   only the status fields.
/// - `claim_pending` moves up to `limit` oldest `pending` events to
///   `processing` atomically, so one event is never claimed twice, and stamps
///   each claim with the ledger's clock.
/// - `reclaim_expired` hands claims older than a cutoff back to `pending`.
///   A claim that outlives its lease belongs to a cycle that died before
///   committing.
#[async_trait]
pub trait EventLedger: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<Event, LedgerError>;

    async fn get(&self, event_id: EventId) -> Result<Option<Event>, LedgerError>;

    /// Existing events among `ids`, in ledger order. Unknown ids are skipped.
    async fn get_many(&self, ids: &[EventId]) -> Result<Vec<Event>, LedgerError>;

    async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, LedgerError>;

    async fn get_stream(&self, stream_id: &StreamId) -> Result<Option<EventStream>, LedgerError>;

    /// All events of one entity in stream version order.
    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<Event>, LedgerError>;

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Event>, LedgerError>;

    /// Ids of the `processing` events claimed before `claimed_before` that
    /// were moved back to `pending`.
    async fn reclaim_expired(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<EventId>, LedgerError>;

    async fn transition(
        &self,
        event_id: EventId,
        from: EventStatus,
        update: StatusUpdate,
    ) -> Result<Event, LedgerError>;

    async fn record_result(&self, result: &ProcessingResult) -> Result<(), LedgerError>;

    /// Audit rows for one event, oldest first.
    async fn results_for(&self, event_id: EventId) -> Result<Vec<ProcessingResult>, LedgerError>;
}

#[async_trait]
impl<L> EventLedger for Arc<L>
where
    L: EventLedger + ?Sized,
{
    async fn append(&self, event: NewEvent) -> Result<Event, LedgerError> {
        (**self).append(event).await
    }

    async fn get(&self, event_id: EventId) -> Result<Option<Event>, LedgerError> {
        (**self).get(event_id).await
    }

    async fn get_many(&self, ids: &[EventId]) -> Result<Vec<Event>, LedgerError> {
        (**self).get_many(ids).await
    }

    async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, LedgerError> {
        (**self).query(filter, pagination).await
    }

    async fn get_stream(&self, stream_id: &StreamId) -> Result<Option<EventStream>, LedgerError> {
        (**self).get_stream(stream_id).await
    }

    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<Event>, LedgerError> {
        (**self).load_stream(stream_id).await
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Event>, LedgerError> {
        (**self).claim_pending(limit).await
    }

    async fn reclaim_expired(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<EventId>, LedgerError> {
        (**self).reclaim_expired(claimed_before).await
    }

    async fn transition(
        &self,
        event_id: EventId,
        from: EventStatus,
        update: StatusUpdate,
    ) -> Result<Event, LedgerError> {
        (**self).transition(event_id, from, update).await
    }

    async fn record_result(&self, result: &ProcessingResult) -> Result<(), LedgerError> {
        (**self).record_result(result).await
    }

    async fn results_for(&self, event_id: EventId) -> Result<Vec<ProcessingResult>, LedgerError> {
        (**self).results_for(event_id).await
    }
}

/// Reject a transition the status machine does not allow.
pub(crate) fn check_transition(
    event_id: EventId,
    from: EventStatus,
    to: EventStatus,
) -> Result<(), LedgerError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition(format!(
            "event {event_id}: {from} -> {to}"
        )))
    }
}
