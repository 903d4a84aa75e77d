//! Per-entity event streams.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use eventhub_core::{DomainError, EventId};

/// `(entity_type, entity_id)`, rendered as `entity_type:entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    entity_type: String,
    entity_id: String,
}

impl StreamId {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for StreamId {
    type Err = DomainError;

    /// Splits on the first `:`; entity ids may themselves contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((t, id)) if !t.is_empty() && !id.is_empty() => Ok(Self::new(t, id)),
            _ => Err(DomainError::validation(format!(
                "stream id must look like entity_type:entity_id, got {s:?}"
            ))),
        }
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered references to every event of one entity, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStream {
    pub stream_id: StreamId,
    pub event_ids: Vec<EventId>,
    /// Number of events appended; starts at 1 for the first.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventStream {
    /// Start a stream with its first event.
    pub fn start(stream_id: StreamId, first: EventId, at: DateTime<Utc>) -> Self {
        Self {
            stream_id,
            event_ids: vec![first],
            version: 1,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn append(&mut self, event_id: EventId, at: DateTime<Utc>) {
        self.event_ids.push(event_id);
        self.version += 1;
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_on_first_colon() {
        let id: StreamId = "order:o1:v2".parse().unwrap();
        assert_eq!(id.entity_type(), "order");
        assert_eq!(id.entity_id(), "o1:v2");
    }

    #[test]
    fn rejects_missing_halves() {
        assert!("order".parse::<StreamId>().is_err());
        assert!(":o1".parse::<StreamId>().is_err());
        assert!("order:".parse::<StreamId>().is_err());
    }

    #[test]
    fn version_tracks_appends() {
        let now = Utc::now();
        let mut stream = EventStream::start(StreamId::new("order", "o1"), EventId::new(), now);
        stream.append(EventId::new(), now);
        assert_eq!(stream.version, 2);
        assert_eq!(stream.event_ids.len(), 2);
    }
}
