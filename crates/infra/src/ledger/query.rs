//! Ledger query model: filters, ordering and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhub_events::{Event, EventCategory, EventSource, EventStatus};

/// Hard cap on a single page.
pub const MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Pagination parameters for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(Some(limit), None)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// `created_at` descending; the listing order.
    #[default]
    NewestFirst,
    /// `created_at` ascending; ledger order.
    OldestFirst,
}

/// Filter criteria for event queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub event_type: Option<String>,
    /// Any-of; empty matches every type.
    #[serde(default)]
    pub event_types: Vec<String>,
    pub category: Option<EventCategory>,
    pub source: Option<EventSource>,
    pub status: Option<EventStatus>,
    pub correlation_id: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    pub retry_count_below: Option<u32>,
    pub retry_count_at_least: Option<u32>,
    #[serde(default)]
    pub order: SortOrder,
}

impl EventFilter {
    /// `status=failed AND retry_count < max_retries`, oldest first.
    pub fn due_for_retry(max_retries: u32) -> Self {
        Self {
            status: Some(EventStatus::Failed),
            retry_count_below: Some(max_retries),
            order: SortOrder::OldestFirst,
            ..Self::default()
        }
    }

    /// `status=failed AND retry_count >= max_retries`, oldest first.
    pub fn retries_exhausted(max_retries: u32) -> Self {
        Self {
            status: Some(EventStatus::Failed),
            retry_count_at_least: Some(max_retries),
            order: SortOrder::OldestFirst,
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        fn eq_opt<T: PartialEq>(want: &Option<T>, have: &T) -> bool {
            want.as_ref().is_none_or(|w| w == have)
        }
        fn eq_opt_str(want: &Option<String>, have: &Option<String>) -> bool {
            want.as_ref()
                .is_none_or(|w| have.as_deref() == Some(w.as_str()))
        }

        eq_opt_str(&self.entity_type, &event.entity_type)
            && eq_opt_str(&self.entity_id, &event.entity_id)
            && eq_opt(&self.event_type, &event.event_type)
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && eq_opt(&self.category, &event.category)
            && eq_opt(&self.source, &event.source)
            && eq_opt(&self.status, &event.status)
            && eq_opt_str(&self.correlation_id, &event.correlation_id)
            && self.created_after.is_none_or(|t| event.created_at >= t)
            && self.created_before.is_none_or(|t| event.created_at <= t)
            && self.retry_count_below.is_none_or(|n| event.retry_count < n)
            && self.retry_count_at_least.is_none_or(|n| event.retry_count >= n)
    }
}

/// Paginated event query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQueryResult {
    pub events: Vec<Event>,
    /// Matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl EventQueryResult {
    pub fn new(events: Vec<Event>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            events,
            total,
            pagination,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_capped() {
        assert_eq!(Pagination::new(Some(5000), None).limit, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(None, None).limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn has_more_reflects_remaining_rows() {
        let page = Pagination::new(Some(2), Some(0));
        assert!(EventQueryResult::new(vec![], 3, page).has_more);
        assert!(!EventQueryResult::new(vec![], 2, page).has_more);
    }
}
