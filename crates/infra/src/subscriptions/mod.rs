//! Subscriptions and best-effort, at-least-once delivery.

pub mod delivery;
pub mod log;
pub mod processor;
#[cfg(feature = "redis")]
pub mod redis;
pub mod registry;

pub use delivery::{BusDeliverer, Deliverer, DeliveryError, RoutingDeliverer, WebhookDeliverer};
pub use log::{DeliveryAttempt, DeliveryLog};
pub use processor::{DELIVERY_PROCESSOR, DeliveryProcessor};
#[cfg(feature = "redis")]
pub use redis::RedisDeliverer;
pub use registry::{SubscriptionError, SubscriptionRegistry};
