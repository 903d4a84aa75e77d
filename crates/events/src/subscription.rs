//! Subscription descriptors: an external consumer's standing filter and target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhub_core::{DomainError, DomainResult, SubscriptionId};

use crate::event::Event;
use crate::filter::EventMatcher;

/// Where matched events are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// Published on the message bus under `topic`.
    Channel { topic: String },
    /// POSTed as JSON to `url`.
    Webhook { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDescriptor {
    pub subscription_id: SubscriptionId,
    pub subscriber_name: String,
    #[serde(default)]
    pub filters: EventMatcher,
    pub target: DeliveryTarget,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionDescriptor {
    pub fn new(
        subscriber_name: impl Into<String>,
        filters: EventMatcher,
        target: DeliveryTarget,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            subscription_id: SubscriptionId::new(),
            subscriber_name: subscriber_name.into(),
            filters,
            target,
            enabled: true,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.subscriber_name.trim().is_empty() {
            return Err(DomainError::validation("subscriber_name is required"));
        }
        match &self.target {
            DeliveryTarget::Channel { topic } if topic.trim().is_empty() => {
                Err(DomainError::validation("channel topic is required"))
            }
            DeliveryTarget::Webhook { url }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                Err(DomainError::validation(format!(
                    "webhook url must be http(s), got {url:?}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Enabled and the filters accept the event.
    pub fn accepts(&self, event: &Event) -> bool {
        self.enabled && self.filters.matches(event)
    }
}
