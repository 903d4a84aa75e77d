//! `eventhub-events` - the event service data model.
//!
//! Events, their status machine, streams, projections, processor and
//! subscription descriptors, audit rows, and the delivery transport
//! abstraction. No IO beyond in-process channels.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod filter;
pub mod in_memory_bus;
pub mod processor;
pub mod projection;
pub mod result;
pub mod status;
pub mod stream;
pub mod subscription;

pub use bus::{EventBus, Subscription};
pub use envelope::DeliveryEnvelope;
pub use event::{Event, EventCategory, EventSource, NewEvent};
pub use filter::EventMatcher;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use processor::{ProcessorDescriptor, ProcessorKind};
pub use projection::{EventProjection, Fold, ProjectionKey};
pub use result::{ProcessingResult, ResultStatus};
pub use status::{EventStatus, StatusUpdate};
pub use stream::{EventStream, StreamId};
pub use subscription::{DeliveryTarget, SubscriptionDescriptor};
