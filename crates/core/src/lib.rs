//! `eventhub-core` - shared building blocks for the event service.
//!
//! Pure primitives only: identifiers, the domain error model and the clock
//! abstraction. No IO lives here.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{EventId, ResultId, SubscriptionId};
