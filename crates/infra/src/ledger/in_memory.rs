use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use eventhub_core::{Clock, EventId, SystemClock};
use eventhub_events::{
    Event, EventStatus, EventStream, NewEvent, ProcessingResult, StatusUpdate, StreamId,
};

use super::query::{EventFilter, EventQueryResult, Pagination, SortOrder};
use super::r#trait::{EventLedger, LedgerError, check_transition};

#[derive(Debug, Default)]
struct LedgerState {
    /// Append order; an event's index is its ledger position.
    events: Vec<Event>,
    index: HashMap<EventId, usize>,
    streams: HashMap<StreamId, EventStream>,
    results: Vec<ProcessingResult>,
    /// When each `processing` event was claimed.
    claims: HashMap<EventId, DateTime<Utc>>,
    last_sequence: Option<DateTime<Utc>>,
}

impl LedgerState {
    fn next_sequence(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self.last_sequence {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_sequence = Some(next);
        next
    }

    fn position(&self, event_id: EventId) -> Result<usize, LedgerError> {
        self.index
            .get(&event_id)
            .copied()
            .ok_or(LedgerError::NotFound(event_id))
    }
}

/// In-memory ledger.
///
/// Intended for tests and single-node dev runs. `set_available(false)` makes
/// every call fail with `StorageUnavailable`.
pub struct InMemoryLedger {
    clock: Arc<dyn Clock>,
    state: RwLock<LedgerState>,
    available: AtomicBool,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(LedgerState::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.ensure_available()?;
        self.state
            .read()
            .map_err(|_| LedgerError::StorageUnavailable("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.ensure_available()?;
        self.state
            .write()
            .map_err(|_| LedgerError::StorageUnavailable("ledger lock poisoned".to_string()))
    }

    fn ensure_available(&self) -> Result<(), LedgerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::StorageUnavailable(
                "in-memory ledger switched off".to_string(),
            ))
        }
    }
}

#[async_trait]
impl EventLedger for InMemoryLedger {
    async fn append(&self, event: NewEvent) -> Result<Event, LedgerError> {
        let now = self.clock.now();
        let mut state = self.write()?;

        if let Some(id) = event.event_id {
            if state.index.contains_key(&id) {
                return Err(LedgerError::DuplicateEvent(id));
            }
        }

        let sequence = state.next_sequence(now);
        let stored = event.into_event(now, sequence);

        if let Some(stream_id) = stored.stream_id() {
            let event_id = stored.event_id;
            state
                .streams
                .entry(stream_id.clone())
                .and_modify(|stream| stream.append(event_id, now))
                .or_insert_with(|| EventStream::start(stream_id, event_id, now));
        }

        let position = state.events.len();
        state.index.insert(stored.event_id, position);
        state.events.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, event_id: EventId) -> Result<Option<Event>, LedgerError> {
        let state = self.read()?;
        Ok(state.index.get(&event_id).map(|&i| state.events[i].clone()))
    }

    async fn get_many(&self, ids: &[EventId]) -> Result<Vec<Event>, LedgerError> {
        let state = self.read()?;
        let mut positions: Vec<usize> = ids.iter().filter_map(|id| state.index.get(id).copied()).collect();
        positions.sort_unstable_by_key(|&i| (state.events[i].sequence_timestamp, i));
        positions.dedup();
        Ok(positions.into_iter().map(|i| state.events[i].clone()).collect())
    }

    async fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, LedgerError> {
        let state = self.read()?;
        let mut matching: Vec<usize> = state
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.matches(e))
            .map(|(i, _)| i)
            .collect();

        match filter.order {
            SortOrder::NewestFirst => {
                matching.sort_unstable_by_key(|&i| Reverse((state.events[i].created_at, i)))
            }
            SortOrder::OldestFirst => {
                matching.sort_unstable_by_key(|&i| (state.events[i].created_at, i))
            }
        }

        let total = matching.len() as u64;
        let events = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .map(|i| state.events[i].clone())
            .collect();

        Ok(EventQueryResult::new(events, total, pagination))
    }

    async fn get_stream(&self, stream_id: &StreamId) -> Result<Option<EventStream>, LedgerError> {
        Ok(self.read()?.streams.get(stream_id).cloned())
    }

    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<Event>, LedgerError> {
        let state = self.read()?;
        let Some(stream) = state.streams.get(stream_id) else {
            return Ok(Vec::new());
        };
        stream
            .event_ids
            .iter()
            .map(|id| state.position(*id).map(|i| state.events[i].clone()))
            .collect()
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<Event>, LedgerError> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let mut pending: Vec<usize> = state
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == EventStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        pending.sort_unstable_by_key(|&i| (state.events[i].created_at, i));
        pending.truncate(limit);

        let mut claimed = Vec::with_capacity(pending.len());
        for i in pending {
            let event = &mut state.events[i];
            event.status = EventStatus::Processing;
            claimed.push(event.clone());
        }
        for event in &claimed {
            state.claims.insert(event.event_id, now);
        }
        Ok(claimed)
    }

    async fn reclaim_expired(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<EventId>, LedgerError> {
        let mut state = self.write()?;
        let mut expired: Vec<(DateTime<Utc>, EventId)> = state
            .claims
            .iter()
            .filter(|(_, at)| **at < claimed_before)
            .map(|(id, at)| (*at, *id))
            .collect();
        expired.sort_unstable();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for (_, event_id) in expired {
            state.claims.remove(&event_id);
            let i = state.position(event_id)?;
            let event = &mut state.events[i];
            if event.status == EventStatus::Processing {
                event.status = EventStatus::Pending;
                event.processed_at = None;
                reclaimed.push(event_id);
            }
        }
        Ok(reclaimed)
    }

    async fn transition(
        &self,
        event_id: EventId,
        from: EventStatus,
        update: StatusUpdate,
    ) -> Result<Event, LedgerError> {
        check_transition(event_id, from, update.status)?;
        let mut state = self.write()?;
        let i = state.position(event_id)?;
        let event = &mut state.events[i];
        if event.status != from {
            return Err(LedgerError::StaleStatus {
                event_id,
                expected: from,
                actual: event.status,
            });
        }
        event.apply_status(&update);
        let updated = event.clone();
        if from == EventStatus::Processing {
            state.claims.remove(&event_id);
        }
        Ok(updated)
    }

    async fn record_result(&self, result: &ProcessingResult) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        state.position(result.event_id)?;
        state.results.push(result.clone());
        Ok(())
    }

    async fn results_for(&self, event_id: EventId) -> Result<Vec<ProcessingResult>, LedgerError> {
        let state = self.read()?;
        Ok(state
            .results
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventhub_core::ManualClock;
    use eventhub_events::{EventCategory, EventSource};
    use serde_json::json;

    fn ledger() -> (Arc<ManualClock>, InMemoryLedger) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = InMemoryLedger::with_clock(clock.clone());
        (clock, ledger)
    }

    fn order(id: &str, event_type: &str) -> NewEvent {
        NewEvent::new(event_type, EventSource::Api, EventCategory::Domain, json!({"id": id}))
            .with_entity("order", id)
    }

    #[tokio::test]
    async fn append_assigns_identity_and_pending_status() {
        let (_, ledger) = ledger();
        let stored = ledger.append(order("o1", "order.created")).await.unwrap();
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(ledger.get(stored.event_id).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn sequence_timestamps_strictly_increase_under_a_frozen_clock() {
        let (_, ledger) = ledger();
        let a = ledger.append(order("o1", "order.created")).await.unwrap();
        let b = ledger.append(order("o1", "order.updated")).await.unwrap();
        assert!(b.sequence_timestamp > a.sequence_timestamp);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let (_, ledger) = ledger();
        let id = EventId::new();
        ledger.append(order("o1", "order.created").with_id(id)).await.unwrap();
        let err = ledger.append(order("o1", "order.created").with_id(id)).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEvent(d) if d == id));
    }

    #[tokio::test]
    async fn streams_are_created_lazily_and_keep_arrival_order() {
        let (_, ledger) = ledger();
        let a = ledger.append(order("o1", "order.created")).await.unwrap();
        ledger.append(order("o2", "order.created")).await.unwrap();
        let c = ledger.append(order("o1", "order.shipped")).await.unwrap();

        let stream_id = StreamId::new("order", "o1");
        let stream = ledger.get_stream(&stream_id).await.unwrap().unwrap();
        assert_eq!(stream.version, 2);
        assert_eq!(stream.event_ids, vec![a.event_id, c.event_id]);

        let events = ledger.load_stream(&stream_id).await.unwrap();
        assert_eq!(events.iter().map(|e| e.event_id).collect::<Vec<_>>(), stream.event_ids);
    }

    #[tokio::test]
    async fn listing_is_newest_first_with_total() {
        let (clock, ledger) = ledger();
        for i in 0..3 {
            ledger.append(order(&format!("o{i}"), "order.created")).await.unwrap();
            clock.advance(Duration::seconds(1));
        }
        let page = ledger
            .query(&EventFilter::default(), Pagination::new(Some(2), None))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_more);
        assert_eq!(page.events[0].entity_id.as_deref(), Some("o2"));
        assert_eq!(page.events[1].entity_id.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn claim_is_oldest_first_and_never_twice() {
        let (clock, ledger) = ledger();
        let first = ledger.append(order("o1", "order.created")).await.unwrap();
        clock.advance(Duration::seconds(1));
        ledger.append(order("o2", "order.created")).await.unwrap();

        let claimed = ledger.claim_pending(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event_id, first.event_id);
        assert_eq!(claimed[0].status, EventStatus::Processing);

        let rest = ledger.claim_pending(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_ne!(rest[0].event_id, first.event_id);
        assert!(ledger.claim_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transition_is_compare_and_set_on_status() {
        let (_, ledger) = ledger();
        let stored = ledger.append(order("o1", "order.created")).await.unwrap();
        let claimed = ledger.claim_pending(1).await.unwrap().remove(0);
        let done = claimed.complete(Utc::now()).unwrap();

        let second_claim = StatusUpdate {
            status: EventStatus::Processing,
            retry_count: 0,
            error_message: None,
            processed_at: None,
        };
        let err = ledger
            .transition(stored.event_id, EventStatus::Pending, second_claim)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::StaleStatus { actual: EventStatus::Processing, .. }
        ));

        let updated = ledger
            .transition(stored.event_id, EventStatus::Processing, done)
            .await
            .unwrap();
        assert_eq!(updated.status, EventStatus::Processed);
        assert_eq!(updated.payload, stored.payload);
    }

    #[tokio::test]
    async fn expired_claims_go_back_to_pending() {
        let (clock, ledger) = ledger();
        let stale = ledger.append(order("o1", "order.created")).await.unwrap();
        ledger.claim_pending(1).await.unwrap();
        clock.advance(Duration::seconds(30));
        let fresh = ledger.append(order("o2", "order.created")).await.unwrap();
        ledger.claim_pending(1).await.unwrap();

        let cutoff = clock.now() - Duration::seconds(10);
        assert_eq!(ledger.reclaim_expired(cutoff).await.unwrap(), vec![stale.event_id]);

        let stale = ledger.get(stale.event_id).await.unwrap().unwrap();
        assert_eq!(stale.status, EventStatus::Pending);
        assert_eq!(stale.retry_count, 0);
        let fresh = ledger.get(fresh.event_id).await.unwrap().unwrap();
        assert_eq!(fresh.status, EventStatus::Processing);

        // Committed claims are not reclaimed later.
        let done = fresh.complete(clock.now()).unwrap();
        ledger
            .transition(fresh.event_id, EventStatus::Processing, done)
            .await
            .unwrap();
        clock.advance(Duration::seconds(60));
        assert!(ledger.reclaim_expired(clock.now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_storage_fails_hard_and_commits_nothing() {
        let (_, ledger) = ledger();
        ledger.set_available(false);
        let err = ledger.append(order("o1", "order.created")).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        ledger.set_available(true);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn get_many_uses_ledger_order_and_skips_unknown_ids() {
        let (_, ledger) = ledger();
        let a = ledger.append(order("o1", "order.created")).await.unwrap();
        let b = ledger.append(order("o1", "order.updated")).await.unwrap();
        let events = ledger
            .get_many(&[b.event_id, EventId::new(), a.event_id])
            .await
            .unwrap();
        assert_eq!(events.iter().map(|e| e.event_id).collect::<Vec<_>>(), vec![a.event_id, b.event_id]);
    }
}
