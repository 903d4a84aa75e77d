//! Redis pub/sub transport for channel subscriptions.
//!
//! Pub/sub is not durable: listeners that are offline miss the message.
//! Replay is the recovery path.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::info;

use eventhub_events::{DeliveryEnvelope, DeliveryTarget, SubscriptionDescriptor};

use super::delivery::{Deliverer, DeliveryError};

/// Publishes each envelope as JSON on the subscription's topic.
///
/// One managed connection is opened on the first delivery and shared by every
/// delivery after it; the manager reconnects on its own when the link drops.
/// A failed first connect is not cached, so the next delivery tries again.
pub struct RedisDeliverer {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisDeliverer {
    /// Validates the URL only. Redis may be down at startup.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, DeliveryError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, DeliveryError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| DeliveryError::Unreachable(e.to_string()))?;
                info!("redis connection established");
                Ok::<_, DeliveryError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl Deliverer for RedisDeliverer {
    async fn deliver(
        &self,
        subscription: &SubscriptionDescriptor,
        envelope: &DeliveryEnvelope,
    ) -> Result<(), DeliveryError> {
        let DeliveryTarget::Channel { topic } = &subscription.target else {
            return Err(DeliveryError::Unsupported("webhook"));
        };
        let payload =
            serde_json::to_string(envelope).map_err(|e| DeliveryError::Serialize(e.to_string()))?;

        let mut conn = self.connection().await?;
        let _: i64 = conn
            .publish(topic.as_str(), payload)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eventhub_events::{EventCategory, EventMatcher, EventSource, NewEvent};
    use serde_json::json;

    #[test]
    fn malformed_url_is_rejected_up_front() {
        assert!(matches!(
            RedisDeliverer::new("not a redis url"),
            Err(DeliveryError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn webhook_targets_never_open_a_connection() {
        // Nothing listens here; reaching for a connection would fail as Unreachable.
        let deliverer = RedisDeliverer::new("redis://127.0.0.1:1/").unwrap();
        let now = Utc::now();
        let subscription = SubscriptionDescriptor::new(
            "hook",
            EventMatcher::any(),
            DeliveryTarget::Webhook {
                url: "http://127.0.0.1:9/hook".into(),
            },
            now,
        );
        let event = NewEvent::new("order.created", EventSource::Api, EventCategory::Domain, json!({}))
            .into_event(now, now);
        let envelope = DeliveryEnvelope::new("hook", None, false, now, event);

        let err = deliverer.deliver(&subscription, &envelope).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unsupported(_)));
        assert!(deliverer.conn.get().is_none());
    }
}
