//! Event status state machine.
//!
//! ```text
//! pending --> processing --> processed            [terminal]
//!             processing --> failed
//!             processing --> pending   (claim released or lease expired)
//! failed --(retry_count < max_retries)--> pending
//! failed --(retry_count >= max_retries)--> archived [terminal]
//! ```

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventhub_core::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Archived,
}

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        EventStatus::Pending,
        EventStatus::Processing,
        EventStatus::Processed,
        EventStatus::Failed,
        EventStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
            EventStatus::Archived => "archived",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Processed | EventStatus::Archived)
    }

    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
                | (Failed, Archived)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventStatus::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("invalid status: {s:?}")))
    }
}

/// The mutable slice of an event, as written by one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: EventStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for from in EventStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in EventStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn pending_cannot_skip_processing() {
        assert!(!EventStatus::Pending.can_transition_to(EventStatus::Processed));
        assert!(!EventStatus::Pending.can_transition_to(EventStatus::Failed));
    }

    #[test]
    fn claimed_events_can_go_back_to_pending() {
        assert!(EventStatus::Processing.can_transition_to(EventStatus::Pending));
        assert!(!EventStatus::Processed.can_transition_to(EventStatus::Pending));
    }

    #[test]
    fn round_trips_through_str() {
        for s in EventStatus::ALL {
            assert_eq!(s.as_str().parse::<EventStatus>().unwrap(), s);
        }
    }
}
