//! A bounded in-process record of delivery attempts.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use eventhub_core::EventId;

pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryAttempt {
    pub subscriber_name: String,
    pub event_id: EventId,
    pub event_type: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub replayed: bool,
    pub attempted_at: DateTime<Utc>,
}

/// Oldest attempts are dropped once `capacity` is reached.
#[derive(Debug)]
pub struct DeliveryLog {
    capacity: usize,
    attempts: Mutex<VecDeque<DeliveryAttempt>>,
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl DeliveryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            attempts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, attempt: DeliveryAttempt) {
        if let Ok(mut attempts) = self.attempts.lock() {
            if attempts.len() == self.capacity {
                attempts.pop_front();
            }
            attempts.push_back(attempt);
        }
    }

    /// Attempts for one subscriber, oldest first.
    pub fn for_subscriber(&self, subscriber_name: &str) -> Vec<DeliveryAttempt> {
        self.attempts
            .lock()
            .map(|a| {
                a.iter()
                    .filter(|x| x.subscriber_name == subscriber_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.attempts.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(subscriber: &str) -> DeliveryAttempt {
        DeliveryAttempt {
            subscriber_name: subscriber.to_string(),
            event_id: EventId::new(),
            event_type: "order.created".to_string(),
            succeeded: true,
            error: None,
            replayed: false,
            attempted_at: Utc::now(),
        }
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let log = DeliveryLog::with_capacity(2);
        let first = attempt("a");
        log.record(first.clone());
        log.record(attempt("a"));
        log.record(attempt("b"));

        assert_eq!(log.len(), 2);
        let a = log.for_subscriber("a");
        assert_eq!(a.len(), 1);
        assert_ne!(a[0].event_id, first.event_id);
    }
}
