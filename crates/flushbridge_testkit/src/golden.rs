//! Golden JSON rendering of change-sets.
//!
//! Handles are arena positions and depend on the order in which a store
//! happened to register entities, so golden comparisons use a normalized
//! rendering: insertions are keyed by temporary uid, updates and
//! deletions are sorted lists.

use flushbridge_protocol::{WireChangeSet, WireEntity};
use serde::Serialize;
use serde_json::{json, Map, Value as Json};

/// Serializes any serde value to JSON.
pub fn to_json<T: Serialize>(value: &T) -> Json {
    serde_json::to_value(value).expect("value serializes to JSON")
}

/// Renders a change-set in handle-independent form.
pub fn change_set_json(change_set: &WireChangeSet) -> Json {
    let mut insertions = Map::new();
    for (oid, entity) in &change_set.entity_insertions {
        let key = change_set
            .temporary_uid_map
            .get(oid)
            .cloned()
            .unwrap_or_else(|| format!("oid:{oid}"));
        insertions.insert(key, to_json(entity));
    }
    json!({
        "insertions": insertions,
        "updates": sorted(change_set.entity_updates.values()),
        "deletions": sorted(change_set.entity_deletions.values()),
    })
}

fn sorted<'a>(entities: impl Iterator<Item = &'a WireEntity>) -> Vec<Json> {
    let mut rendered: Vec<Json> = entities.map(to_json).collect();
    rendered.sort_by_key(|json| json.to_string());
    rendered
}

/// Asserts two JSON documents are equal, printing both on mismatch.
pub fn assert_json_eq(actual: &Json, expected: &Json) {
    if actual != expected {
        panic!(
            "JSON mismatch\n--- expected\n{}\n--- actual\n{}",
            serde_json::to_string_pretty(expected).unwrap_or_default(),
            serde_json::to_string_pretty(actual).unwrap_or_default()
        );
    }
}
