use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use eventhub_core::EventId;
use eventhub_events::{
    DeliveryTarget, EventCategory, EventMatcher, EventSource, EventStatus, ProcessorKind,
};
use eventhub_infra::ledger::{EventFilter, Pagination, SortOrder};
use eventhub_infra::pipeline::NewProcessor;

use crate::app::errors;

/// Decode a JSON body, turning shape errors into 400 validation responses
/// instead of axum's default rejection.
pub fn parse_body<T: DeserializeOwned>(body: JsonValue) -> Result<T, axum::response::Response> {
    serde_json::from_value(body).map_err(|e| errors::bad_request(format!("invalid request body: {e}")))
}

pub fn parse_event_id(raw: &str) -> Result<EventId, axum::response::Response> {
    raw.parse::<EventId>()
        .map_err(|e| errors::bad_request(e.to_string()))
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub subscriber_name: String,
    #[serde(flatten)]
    pub filters: EventMatcher,
    pub target: DeliveryTarget,
}

#[derive(Debug, Deserialize)]
pub struct CreateProcessorRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProcessorKind,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub filters: EventMatcher,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl CreateProcessorRequest {
    pub fn into_new_processor(self) -> NewProcessor {
        let mut request = NewProcessor::new(self.name, self.kind)
            .with_priority(self.priority)
            .with_filters(self.filters);
        request.enabled = self.enabled;
        request
    }
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

// -------------------------
// Query strings
// -------------------------

/// `GET /events` parameters. Enum-valued fields are parsed by hand so a bad
/// value is a 400 with a useful message.
///
/// `order` is `asc` or `desc` by `created_at`. Without it, a query pinned to
/// one entity reads as that entity's history (oldest first); anything else
/// lists newest first.
#[derive(Debug, Default, Deserialize)]
pub struct EventListQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub event_type: Option<String>,
    pub category: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub correlation_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub order: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl EventListQuery {
    pub fn into_filter(self) -> Result<(EventFilter, Pagination), axum::response::Response> {
        let category = parse_opt::<EventCategory>(self.category.as_deref())?;
        let source = parse_opt::<EventSource>(self.source.as_deref())?;
        let status = parse_opt::<EventStatus>(self.status.as_deref())?;
        if self.limit == Some(0) {
            return Err(errors::bad_request("limit must be at least 1"));
        }
        let order = match self.order.as_deref() {
            Some("asc") => SortOrder::OldestFirst,
            Some("desc") => SortOrder::NewestFirst,
            Some(other) => {
                return Err(errors::bad_request(format!(
                    "order must be asc or desc, got {other:?}"
                )));
            }
            None if self.entity_type.is_some() && self.entity_id.is_some() => {
                SortOrder::OldestFirst
            }
            None => SortOrder::NewestFirst,
        };

        let filter = EventFilter {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            event_type: self.event_type,
            category,
            source,
            status,
            correlation_id: self.correlation_id,
            created_after: self.created_after,
            created_before: self.created_before,
            order,
            ..EventFilter::default()
        };
        Ok((filter, Pagination::new(self.limit, self.offset)))
    }
}

fn parse_opt<T>(raw: Option<&str>) -> Result<Option<T>, axum::response::Response>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|s| s.parse::<T>().map_err(|e| errors::bad_request(e.to_string())))
        .transpose()
}
