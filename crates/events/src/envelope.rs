use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// What a subscriber receives for one matched event.
///
/// Delivery is at-least-once: the same `event` may arrive in several envelopes
/// (live, then replayed), each with its own `delivery_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    delivery_id: Uuid,
    subscriber_name: String,
    topic: Option<String>,
    replayed: bool,
    delivered_at: DateTime<Utc>,
    event: Event,
}

impl DeliveryEnvelope {
    pub fn new(
        subscriber_name: impl Into<String>,
        topic: Option<String>,
        replayed: bool,
        delivered_at: DateTime<Utc>,
        event: Event,
    ) -> Self {
        Self {
            delivery_id: Uuid::now_v7(),
            subscriber_name: subscriber_name.into(),
            topic,
            replayed,
            delivered_at,
            event,
        }
    }

    pub fn delivery_id(&self) -> Uuid {
        self.delivery_id
    }

    pub fn subscriber_name(&self) -> &str {
        &self.subscriber_name
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn replayed(&self) -> bool {
        self.replayed
    }

    pub fn delivered_at(&self) -> DateTime<Utc> {
        self.delivered_at
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn into_event(self) -> Event {
        self.event
    }
}
