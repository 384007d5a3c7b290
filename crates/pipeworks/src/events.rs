//! Append-only audit event log built on top of [`crate::store::Store`].
//!
//! Distinct from `shipper-events::EventLog`, which is a
//! JSONL file the publish CLI appends to directly: here persistence goes
//! through the `Store` trait like everything else, since a pipeline run's
//! events need to be queryable alongside its Outcomes by the same backend.

use crate::error::Result;
use crate::store::Store;
use crate::types::{Event, EventName, Id};

/// Workload lifecycle hooks that are audit-only — they never produce an
/// Outcome, only an Event.
pub const AUDIT_ONLY_HOOKS: [EventName; 4] = [
    EventName::ComponentStart,
    EventName::ComponentStop,
    EventName::TaskStart,
    EventName::TaskState,
];

/// Record an audit-only event for one of the [`AUDIT_ONLY_HOOKS`].
pub fn record_hook_event(
    store: &dyn Store,
    pipeline_log_id: Id,
    stage_log_id: Id,
    action_log_id: Id,
    sequence: i64,
    hook: EventName,
    payload: serde_json::Value,
) -> Result<()> {
    store.insert_event(Event {
        pipeline_log_id,
        stage_log_id,
        action_log_id,
        sequence,
        title: hook_title(hook),
        payload,
    })
}

fn hook_title(hook: EventName) -> String {
    serde_json::to_value(hook)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn records_event_with_hook_name_as_title() {
        let store = InMemoryStore::new();
        record_hook_event(&store, 1, 2, 3, 1, EventName::ComponentStart, json!({"ok": true})).unwrap();
        let events = store.get_events(1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "COMPONENT_START");
    }
}
