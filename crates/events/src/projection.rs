//! Per-entity read models folded from an entity's stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use eventhub_core::EventId;

use crate::event::Event;

/// `(entity_type, entity_id, projection_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectionKey {
    pub entity_type: String,
    pub entity_id: String,
    pub projection_name: String,
}

impl ProjectionKey {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        projection_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            projection_name: projection_name.into(),
        }
    }

    /// Key for `projection_name` on the event's entity, if it has one.
    pub fn for_event(event: &Event, projection_name: &str) -> Option<Self> {
        match (&event.entity_type, &event.entity_id) {
            (Some(t), Some(id)) => Some(Self::new(t.as_str(), id.as_str(), projection_name)),
            _ => None,
        }
    }
}

/// A versioned current-state document for one entity.
///
/// `version` always equals the number of events folded into `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProjection {
    pub entity_type: String,
    pub entity_id: String,
    pub projection_name: String,
    pub state: JsonValue,
    pub version: u64,
    pub last_event_id: Option<EventId>,
    pub last_sequence_timestamp: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl EventProjection {
    pub fn empty(key: ProjectionKey, state: JsonValue, at: DateTime<Utc>) -> Self {
        Self {
            entity_type: key.entity_type,
            entity_id: key.entity_id,
            projection_name: key.projection_name,
            state,
            version: 0,
            last_event_id: None,
            last_sequence_timestamp: None,
            updated_at: at,
        }
    }

    pub fn key(&self) -> ProjectionKey {
        ProjectionKey::new(
            self.entity_type.as_str(),
            self.entity_id.as_str(),
            self.projection_name.as_str(),
        )
    }

    /// The event was the last one folded in.
    pub fn has_applied(&self, event: &Event) -> bool {
        self.last_event_id == Some(event.event_id)
    }

    /// The event sorts strictly before the last one folded in.
    pub fn is_behind(&self, event: &Event) -> bool {
        self.last_sequence_timestamp
            .is_some_and(|last| event.sequence_timestamp < last)
    }

    /// Bookkeeping after `event` was folded into `state`.
    pub fn mark_applied(&mut self, event: &Event, at: DateTime<Utc>) {
        self.version += 1;
        self.last_event_id = Some(event.event_id);
        self.last_sequence_timestamp = Some(event.sequence_timestamp);
        self.updated_at = at;
    }
}

/// A named fold from events into a projection document.
///
/// Folds are pure: the engine owns loading, idempotence and ordering.
pub trait Fold: Send + Sync {
    fn name(&self) -> &str;

    fn initial_state(&self) -> JsonValue {
        json!({})
    }

    fn fold(&self, state: &mut JsonValue, event: &Event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventCategory, EventSource, NewEvent};
    use chrono::Duration;

    fn event_at(at: DateTime<Utc>) -> Event {
        NewEvent::new("order.created", EventSource::Api, EventCategory::Domain, json!({}))
            .with_entity("order", "o1")
            .into_event(at, at)
    }

    #[test]
    fn bookkeeping_tracks_last_applied() {
        let now = Utc::now();
        let e1 = event_at(now);
        let e2 = event_at(now + Duration::seconds(1));
        let key = ProjectionKey::for_event(&e1, "current_state").unwrap();
        let mut p = EventProjection::empty(key, json!({}), now);

        assert!(!p.is_behind(&e1));
        p.mark_applied(&e2, now);
        assert_eq!(p.version, 1);
        assert!(p.has_applied(&e2));
        assert!(p.is_behind(&e1));
    }

    #[test]
    fn events_without_entity_have_no_key() {
        let now = Utc::now();
        let e = NewEvent::new("ping", EventSource::System, EventCategory::System, json!({}))
            .into_event(now, now);
        assert!(ProjectionKey::for_event(&e, "current_state").is_none());
    }
}
