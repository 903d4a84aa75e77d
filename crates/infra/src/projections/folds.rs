//! Built-in folds.

use serde_json::{Map, Value as JsonValue, json};

use eventhub_events::{Event, Fold};

pub const CURRENT_STATE: &str = "current_state";
pub const ACTIVITY: &str = "activity";

/// Shallow-merges object payloads into the document; a `null` value removes
/// the key. Non-object payloads replace the `value` key.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentStateFold;

impl Fold for CurrentStateFold {
    fn name(&self) -> &str {
        CURRENT_STATE
    }

    fn fold(&self, state: &mut JsonValue, event: &Event) {
        if !state.is_object() {
            *state = JsonValue::Object(Map::new());
        }
        let Some(doc) = state.as_object_mut() else {
            return;
        };
        match &event.payload {
            JsonValue::Object(fields) => {
                for (k, v) in fields {
                    if v.is_null() {
                        doc.remove(k);
                    } else {
                        doc.insert(k.clone(), v.clone());
                    }
                }
            }
            JsonValue::Null => {}
            other => {
                doc.insert("value".to_string(), other.clone());
            }
        }
    }
}

/// Per-entity activity summary: counts by `event_type`, first/last seen.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActivityFold;

impl Fold for ActivityFold {
    fn name(&self) -> &str {
        ACTIVITY
    }

    fn initial_state(&self) -> JsonValue {
        json!({ "total": 0, "counts": {} })
    }

    fn fold(&self, state: &mut JsonValue, event: &Event) {
        if !state.is_object() {
            *state = self.initial_state();
        }
        let seen = JsonValue::String(event.sequence_timestamp.to_rfc3339());
        let Some(doc) = state.as_object_mut() else {
            return;
        };

        let total = doc.get("total").and_then(JsonValue::as_u64).unwrap_or(0);
        doc.insert("total".to_string(), json!(total + 1));

        let counts = doc
            .entry("counts")
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let Some(counts) = counts.as_object_mut() {
            let n = counts
                .get(&event.event_type)
                .and_then(JsonValue::as_u64)
                .unwrap_or(0);
            counts.insert(event.event_type.clone(), json!(n + 1));
        }

        doc.entry("first_seen").or_insert_with(|| seen.clone());
        doc.insert("last_seen".to_string(), seen);
        doc.insert(
            "last_event_type".to_string(),
            JsonValue::String(event.event_type.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eventhub_events::{EventCategory, EventSource, NewEvent};

    fn event(event_type: &str, payload: JsonValue) -> Event {
        let now = Utc::now();
        NewEvent::new(event_type, EventSource::Api, EventCategory::Domain, payload)
            .with_entity("order", "o1")
            .into_event(now, now)
    }

    #[test]
    fn current_state_merges_and_null_removes() {
        let fold = CurrentStateFold;
        let mut state = fold.initial_state();
        fold.fold(&mut state, &event("order.created", json!({"status": "new", "total": 5})));
        fold.fold(&mut state, &event("order.updated", json!({"status": "paid", "total": null})));
        assert_eq!(state, json!({"status": "paid"}));
    }

    #[test]
    fn current_state_keeps_scalar_payloads_under_value() {
        let fold = CurrentStateFold;
        let mut state = fold.initial_state();
        fold.fold(&mut state, &event("counter.set", json!(42)));
        assert_eq!(state, json!({"value": 42}));
    }

    #[test]
    fn activity_counts_by_type() {
        let fold = ActivityFold;
        let mut state = fold.initial_state();
        fold.fold(&mut state, &event("order.created", json!({})));
        fold.fold(&mut state, &event("order.updated", json!({})));
        fold.fold(&mut state, &event("order.updated", json!({})));
        assert_eq!(state["total"], 3);
        assert_eq!(state["counts"]["order.updated"], 2);
        assert_eq!(state["last_event_type"], "order.updated");
        assert!(state["first_seen"].is_string());
    }
}
