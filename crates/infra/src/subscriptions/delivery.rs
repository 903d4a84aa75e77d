//! Delivery transports. One attempt per call; no retries here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use eventhub_events::{DeliveryEnvelope, DeliveryTarget, EventBus, SubscriptionDescriptor};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber unreachable: {0}")]
    Unreachable(String),

    #[error("subscriber rejected delivery with status {status}")]
    Rejected { status: u16 },

    #[error("failed to encode envelope: {0}")]
    Serialize(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no transport for {0} targets")]
    Unsupported(&'static str),
}

#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        subscription: &SubscriptionDescriptor,
        envelope: &DeliveryEnvelope,
    ) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<D> Deliverer for Arc<D>
where
    D: Deliverer + ?Sized,
{
    async fn deliver(
        &self,
        subscription: &SubscriptionDescriptor,
        envelope: &DeliveryEnvelope,
    ) -> Result<(), DeliveryError> {
        (**self).deliver(subscription, envelope).await
    }
}

/// Publishes channel deliveries onto an [`EventBus`]; listeners pick their
/// topic off the envelope.
pub struct BusDeliverer<B> {
    bus: B,
}

impl<B> BusDeliverer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B> Deliverer for BusDeliverer<B>
where
    B: EventBus<DeliveryEnvelope>,
{
    async fn deliver(
        &self,
        _subscription: &SubscriptionDescriptor,
        envelope: &DeliveryEnvelope,
    ) -> Result<(), DeliveryError> {
        self.bus
            .publish(envelope.clone())
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

/// POSTs the envelope as JSON. Any non-2xx answer is a rejection.
#[derive(Debug, Clone)]
pub struct WebhookDeliverer {
    client: reqwest::Client,
}

impl WebhookDeliverer {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Deliverer for WebhookDeliverer {
    async fn deliver(
        &self,
        subscription: &SubscriptionDescriptor,
        envelope: &DeliveryEnvelope,
    ) -> Result<(), DeliveryError> {
        let DeliveryTarget::Webhook { url } = &subscription.target else {
            return Err(DeliveryError::Unsupported("channel"));
        };
        let response = self
            .client
            .post(url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    DeliveryError::Unreachable(e.to_string())
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

/// Picks a transport by target kind.
pub struct RoutingDeliverer {
    channel: Arc<dyn Deliverer>,
    webhook: Option<Arc<dyn Deliverer>>,
}

impl RoutingDeliverer {
    pub fn new(channel: Arc<dyn Deliverer>) -> Self {
        Self {
            channel,
            webhook: None,
        }
    }

    pub fn with_webhooks(mut self, webhook: Arc<dyn Deliverer>) -> Self {
        self.webhook = Some(webhook);
        self
    }
}

#[async_trait]
impl Deliverer for RoutingDeliverer {
    async fn deliver(
        &self,
        subscription: &SubscriptionDescriptor,
        envelope: &DeliveryEnvelope,
    ) -> Result<(), DeliveryError> {
        match &subscription.target {
            DeliveryTarget::Channel { .. } => self.channel.deliver(subscription, envelope).await,
            DeliveryTarget::Webhook { .. } => match &self.webhook {
                Some(webhook) => webhook.deliver(subscription, envelope).await,
                None => Err(DeliveryError::Unsupported("webhook")),
            },
        }
    }
}
