//! Filter matching shared by processors and subscriptions.
//!
//! A matcher accepts an event when every list is either empty (match-all) or
//! contains the event's corresponding field. Comparisons are exact; there is no
//! prefix or glob matching.

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventCategory, EventSource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMatcher {
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub event_sources: Vec<EventSource>,
    #[serde(default)]
    pub event_categories: Vec<EventCategory>,
}

impl EventMatcher {
    /// Matches every event.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = EventSource>) -> Self {
        self.event_sources = sources.into_iter().collect();
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = EventCategory>) -> Self {
        self.event_categories = categories.into_iter().collect();
        self
    }

    pub fn matches_fields(
        &self,
        event_type: &str,
        source: EventSource,
        category: EventCategory,
    ) -> bool {
        (self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type))
            && (self.event_sources.is_empty() || self.event_sources.contains(&source))
            && (self.event_categories.is_empty() || self.event_categories.contains(&category))
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.matches_fields(&event.event_type, event.source, event.category)
    }
}
