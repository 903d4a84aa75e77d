//! The built-in `delivery` processor.
//!
//! Delivery failures are logged and recorded in the [`DeliveryLog`]; they
//! never fail the processor, so they never touch the event's status.
//!
//! A live dispatch in which an earlier processor already failed delivers
//! nothing: the event will be retried and delivery happens on the attempt
//! that gets that far cleanly. Replays always deliver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use eventhub_core::Clock;
use eventhub_events::{DeliveryEnvelope, DeliveryTarget, Event};

use super::delivery::Deliverer;
use super::log::{DeliveryAttempt, DeliveryLog};
use super::registry::SubscriptionRegistry;
use crate::pipeline::{DispatchContext, Processor, ProcessorError};

/// Registry name of the built-in delivery processor.
pub const DELIVERY_PROCESSOR: &str = "delivery";

pub struct DeliveryProcessor {
    subscriptions: Arc<SubscriptionRegistry>,
    deliverer: Arc<dyn Deliverer>,
    log: Arc<DeliveryLog>,
    clock: Arc<dyn Clock>,
}

impl DeliveryProcessor {
    pub fn new(
        subscriptions: Arc<SubscriptionRegistry>,
        deliverer: Arc<dyn Deliverer>,
        log: Arc<DeliveryLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            deliverer,
            log,
            clock,
        }
    }
}

#[async_trait]
impl Processor for DeliveryProcessor {
    async fn handle(
        &self,
        event: &Event,
        ctx: &DispatchContext,
    ) -> Result<Option<String>, ProcessorError> {
        let targets: Vec<_> = self
            .subscriptions
            .matching(event)
            .await
            .into_iter()
            .filter(|s| {
                ctx.subscriber
                    .as_deref()
                    .is_none_or(|only| s.subscriber_name == only)
            })
            .collect();

        if targets.is_empty() {
            return Ok(Some("no matching subscriptions".to_string()));
        }

        if ctx.after_failure() {
            debug!(event_id = %event.event_id, "earlier processor failed, delivery deferred to retry");
            return Ok(Some("skipped: earlier processor failed".to_string()));
        }

        if ctx.mode.is_dry_run() {
            let names: Vec<_> = targets.iter().map(|s| s.subscriber_name.as_str()).collect();
            return Ok(Some(format!("would deliver to {}", names.join(","))));
        }

        let replayed = ctx.mode.is_replay();
        let mut delivered = 0usize;
        for subscription in &targets {
            let now = self.clock.now();
            let topic = match &subscription.target {
                DeliveryTarget::Channel { topic } => Some(topic.clone()),
                DeliveryTarget::Webhook { .. } => None,
            };
            let envelope = DeliveryEnvelope::new(
                subscription.subscriber_name.as_str(),
                topic,
                replayed,
                now,
                event.clone(),
            );

            let outcome = self.deliverer.deliver(subscription, &envelope).await;
            let error = match outcome {
                Ok(()) => {
                    delivered += 1;
                    debug!(event_id = %event.event_id, subscriber = %subscription.subscriber_name, replayed, "event delivered");
                    None
                }
                Err(e) => {
                    warn!(event_id = %event.event_id, subscriber = %subscription.subscriber_name, error = %e, "delivery failed");
                    Some(e.to_string())
                }
            };
            self.log.record(DeliveryAttempt {
                subscriber_name: subscription.subscriber_name.clone(),
                event_id: event.event_id,
                event_type: event.event_type.clone(),
                succeeded: error.is_none(),
                error,
                replayed,
                attempted_at: now,
            });
        }

        Ok(Some(format!("delivered {delivered}/{}", targets.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use crate::subscriptions::delivery::{BusDeliverer, RoutingDeliverer};
    use chrono::Utc;
    use eventhub_core::SystemClock;
    use eventhub_events::{
        EventBus, EventCategory, EventMatcher, EventSource, InMemoryEventBus, NewEvent,
    };
    use serde_json::json;

    struct Fixture {
        registry: Arc<SubscriptionRegistry>,
        bus: Arc<InMemoryEventBus<DeliveryEnvelope>>,
        log: Arc<DeliveryLog>,
        processor: DeliveryProcessor,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(InMemoryMetadataStore::new())));
        let bus = Arc::new(InMemoryEventBus::new());
        let log = Arc::new(DeliveryLog::default());
        let deliverer = RoutingDeliverer::new(Arc::new(BusDeliverer::new(bus.clone())));
        let processor = DeliveryProcessor::new(
            registry.clone(),
            Arc::new(deliverer),
            log.clone(),
            Arc::new(SystemClock),
        );
        Fixture {
            registry,
            bus,
            log,
            processor,
        }
    }

    fn event(event_type: &str) -> Event {
        let now = Utc::now();
        NewEvent::new(event_type, EventSource::Api, EventCategory::Domain, json!({}))
            .into_event(now, now)
    }

    #[tokio::test]
    async fn only_matching_subscriptions_get_an_attempt() {
        let f = fixture();
        f.registry
            .create(
                "billing",
                EventMatcher::for_types(["order.created"]),
                DeliveryTarget::Channel {
                    topic: "billing".into(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        f.processor.handle(&event("order.updated"), &DispatchContext::live()).await.unwrap();
        assert!(f.log.for_subscriber("billing").is_empty());

        f.processor.handle(&event("order.created"), &DispatchContext::live()).await.unwrap();
        assert_eq!(f.log.for_subscriber("billing").len(), 1);
    }

    #[tokio::test]
    async fn failed_webhook_delivery_does_not_fail_the_processor() {
        let f = fixture();
        f.registry
            .create(
                "hook",
                EventMatcher::any(),
                DeliveryTarget::Webhook {
                    url: "http://127.0.0.1:9/hook".into(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let msg = f
            .processor
            .handle(&event("order.created"), &DispatchContext::live())
            .await
            .unwrap();
        assert_eq!(msg.as_deref(), Some("delivered 0/1"));
        let attempts = f.log.for_subscriber("hook");
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].succeeded);
    }

    #[tokio::test]
    async fn dry_run_delivers_nothing() {
        let f = fixture();
        let listener = f.bus.subscribe();
        f.registry
            .create(
                "billing",
                EventMatcher::any(),
                DeliveryTarget::Channel {
                    topic: "billing".into(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let msg = f
            .processor
            .handle(&event("order.created"), &DispatchContext::replay(true))
            .await
            .unwrap();
        assert_eq!(msg.as_deref(), Some("would deliver to billing"));
        assert!(listener.try_recv().is_err());
        assert!(f.log.is_empty());
    }

    #[tokio::test]
    async fn live_delivery_waits_for_a_clean_attempt() {
        let f = fixture();
        let listener = f.bus.subscribe();
        f.registry
            .create(
                "billing",
                EventMatcher::any(),
                DeliveryTarget::Channel {
                    topic: "billing".into(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let failed_earlier = DispatchContext {
            earlier_failure: true,
            ..DispatchContext::live()
        };

        let msg = f
            .processor
            .handle(&event("order.created"), &failed_earlier)
            .await
            .unwrap();
        assert_eq!(msg.as_deref(), Some("skipped: earlier processor failed"));
        assert!(listener.try_recv().is_err());
        assert!(f.log.is_empty());

        // A replay re-drives delivery regardless.
        let replay = DispatchContext {
            earlier_failure: true,
            ..DispatchContext::replay(false)
        };
        let msg = f.processor.handle(&event("order.created"), &replay).await.unwrap();
        assert_eq!(msg.as_deref(), Some("delivered 1/1"));
        assert!(listener.try_recv().is_ok());
    }
}
