//! The `Event` record and its ingestion form.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use eventhub_core::{DomainError, DomainResult, EventId};

use crate::status::{EventStatus, StatusUpdate};
use crate::stream::StreamId;

/// Longest accepted `event_type`.
pub const MAX_EVENT_TYPE_LEN: usize = 255;

/// Where an event entered the system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Api,
    Service,
    Webhook,
    Scheduler,
    System,
    External,
}

/// Coarse classification of what an event is about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Domain,
    Integration,
    System,
    Audit,
    Notification,
}

impl EventSource {
    pub const ALL: [EventSource; 6] = [
        EventSource::Api,
        EventSource::Service,
        EventSource::Webhook,
        EventSource::Scheduler,
        EventSource::System,
        EventSource::External,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Api => "api",
            EventSource::Service => "service",
            EventSource::Webhook => "webhook",
            EventSource::Scheduler => "scheduler",
            EventSource::System => "system",
            EventSource::External => "external",
        }
    }
}

impl EventCategory {
    pub const ALL: [EventCategory; 5] = [
        EventCategory::Domain,
        EventCategory::Integration,
        EventCategory::System,
        EventCategory::Audit,
        EventCategory::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Domain => "domain",
            EventCategory::Integration => "integration",
            EventCategory::System => "system",
            EventCategory::Audit => "audit",
            EventCategory::Notification => "notification",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventSource::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("invalid source: {s:?}")))
    }
}

impl FromStr for EventCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("invalid category: {s:?}")))
    }
}

/// An immutable fact stored in the ledger.
///
/// Only `status`, `retry_count`, `error_message` and `processed_at` change after
/// the ledger accepts the event, and only through [`Event::apply_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub event_type: String,
    pub source: EventSource,
    pub category: EventCategory,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub correlation_id: Option<String>,
    pub payload: JsonValue,
    pub metadata: JsonValue,

    pub status: EventStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,

    /// Assigned at ingestion; total order for a single entity.
    pub sequence_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// The stream this event belongs to, if it names an entity.
    pub fn stream_id(&self) -> Option<StreamId> {
        match (&self.entity_type, &self.entity_id) {
            (Some(t), Some(id)) => Some(StreamId::new(t.clone(), id.clone())),
            _ => None,
        }
    }

    /// Apply a status transition computed by the status machine.
    pub fn apply_status(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        self.retry_count = update.retry_count;
        self.error_message = update.error_message.clone();
        self.processed_at = update.processed_at;
    }

    /// Transition `pending -> processing`.
    pub fn begin_processing(&self) -> DomainResult<StatusUpdate> {
        self.transition(EventStatus::Processing, self.retry_count, None, None)
    }

    /// Transition `processing -> processed`.
    pub fn complete(&self, at: DateTime<Utc>) -> DomainResult<StatusUpdate> {
        self.transition(EventStatus::Processed, self.retry_count, None, Some(at))
    }

    /// Transition `processing -> failed`, counting the attempt.
    pub fn fail(&self, error: impl Into<String>, at: DateTime<Utc>) -> DomainResult<StatusUpdate> {
        self.transition(
            EventStatus::Failed,
            self.retry_count.saturating_add(1),
            Some(error.into()),
            Some(at),
        )
    }

    /// Transition `processing -> pending` for a claim that never committed.
    /// Not an attempt, so `retry_count` is unchanged.
    pub fn release(&self) -> DomainResult<StatusUpdate> {
        self.transition(
            EventStatus::Pending,
            self.retry_count,
            self.error_message.clone(),
            None,
        )
    }

    /// Transition `failed -> pending` for another attempt.
    pub fn requeue(&self) -> DomainResult<StatusUpdate> {
        self.transition(
            EventStatus::Pending,
            self.retry_count,
            self.error_message.clone(),
            None,
        )
    }

    /// Transition `failed -> archived` once retries are exhausted.
    pub fn archive(&self) -> DomainResult<StatusUpdate> {
        self.transition(
            EventStatus::Archived,
            self.retry_count,
            self.error_message.clone(),
            self.processed_at,
        )
    }

    fn transition(
        &self,
        next: EventStatus,
        retry_count: u32,
        error_message: Option<String>,
        processed_at: Option<DateTime<Utc>>,
    ) -> DomainResult<StatusUpdate> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::conflict(format!(
                "event {} cannot move from {} to {}",
                self.event_id, self.status, next
            )));
        }
        Ok(StatusUpdate {
            status: next,
            retry_count,
            error_message,
            processed_at,
        })
    }
}

/// An ingestion request: everything the producer supplies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(default)]
    pub event_id: Option<EventId>,
    pub event_type: String,
    pub source: EventSource,
    pub category: EventCategory,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

impl NewEvent {
    pub fn new(
        event_type: impl Into<String>,
        source: EventSource,
        category: EventCategory,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id: None,
            event_type: event_type.into(),
            source,
            category,
            entity_type: None,
            entity_id: None,
            correlation_id: None,
            payload,
            metadata: None,
        }
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Reject malformed requests before they reach the ledger.
    pub fn validate(&self) -> DomainResult<()> {
        let event_type = self.event_type.trim();
        if event_type.is_empty() {
            return Err(DomainError::validation("event_type is required"));
        }
        if event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(DomainError::validation(format!(
                "event_type exceeds {MAX_EVENT_TYPE_LEN} characters"
            )));
        }
        if event_type != self.event_type {
            return Err(DomainError::validation(
                "event_type must not have surrounding whitespace",
            ));
        }
        if !event_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(DomainError::validation(format!(
                "event_type {event_type:?} may only contain letters, digits, '.', '_' and '-'"
            )));
        }

        match (&self.entity_type, &self.entity_id) {
            (Some(t), Some(id)) => {
                if t.trim().is_empty() || id.trim().is_empty() {
                    return Err(DomainError::validation(
                        "entity_type and entity_id must not be blank",
                    ));
                }
                if t.contains(':') {
                    return Err(DomainError::validation("entity_type must not contain ':'"));
                }
            }
            (None, None) => {}
            _ => {
                return Err(DomainError::validation(
                    "entity_type and entity_id must be given together",
                ));
            }
        }

        if let Some(metadata) = &self.metadata {
            if !metadata.is_object() {
                return Err(DomainError::validation("metadata must be a JSON object"));
            }
        }
        Ok(())
    }

    /// Materialise the stored record. The ledger supplies the timestamps.
    pub fn into_event(self, created_at: DateTime<Utc>, sequence_timestamp: DateTime<Utc>) -> Event {
        Event {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type,
            source: self.source,
            category: self.category,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            correlation_id: self.correlation_id,
            payload: self.payload,
            metadata: self.metadata.unwrap_or_else(|| json!({})),
            status: EventStatus::Pending,
            retry_count: 0,
            error_message: None,
            sequence_timestamp,
            created_at,
            processed_at: None,
        }
    }
}
