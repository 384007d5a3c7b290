//! Dynamically typed JSON value, dotted-path access, and schema description.
//!
//! Input/output descriptions and relation field-paths are dynamically
//! typed. Rather than hand-rolling a tagged `JsonValue = Null | Bool |
//! Number | String | Array | Object` variant, this module reuses
//! `serde_json::Value`, which is exactly that representation, and builds
//! dotted-path access and schema description on top of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A normalized schema describing the scalar type of every leaf in a JSON
/// value, produced by [`describe_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonSchema {
    Null,
    Bool,
    Number,
    String,
    Array { items: Vec<JsonSchema> },
    Object { fields: BTreeMap<String, JsonSchema> },
}

/// Recursively walk a JSON value and annotate each leaf with its scalar
/// type.
pub fn describe_json(value: &JsonValue) -> JsonSchema {
    match value {
        JsonValue::Null => JsonSchema::Null,
        JsonValue::Bool(_) => JsonSchema::Bool,
        JsonValue::Number(_) => JsonSchema::Number,
        JsonValue::String(_) => JsonSchema::String,
        JsonValue::Array(items) => JsonSchema::Array {
            items: items.iter().map(describe_json).collect(),
        },
        JsonValue::Object(map) => JsonSchema::Object {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), describe_json(v)))
                .collect(),
        },
    }
}

/// Strip a single leading `.` from a dotted path, here "Path
/// semantics": a leading `.` is tolerated and stripped.
fn normalize_path(path: &str) -> &str {
    path.strip_prefix('.').unwrap_or(path)
}

/// Read the value at dotted path `path` from `root`.
///
/// Each intermediate segment must resolve to an object; if it doesn't,
/// or the path is missing entirely, `None` is returned.
pub fn get_by_path<'a>(path: &str, root: &'a JsonValue) -> Option<&'a JsonValue> {
    let path = normalize_path(path);
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write `value` into `root` at dotted path `path`, creating intermediate
/// objects as needed.
pub fn set_by_path(path: &str, root: &mut JsonValue, value: JsonValue) {
    let path = normalize_path(path);
    if path.is_empty() {
        *root = value;
        return;
    }

    if !root.is_object() {
        *root = JsonValue::Object(serde_json::Map::new());
    }

    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        let map = current.as_object_mut().expect("ensured object above");
        let entry = map
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(serde_json::Map::new());
        }
        current = entry;
    }

    let map = current.as_object_mut().expect("ensured object above");
    map.insert(segments[segments.len() - 1].to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn describe_json_annotates_scalars() {
        let value = json!({"x": {"y": 5}, "list": [1, "a", null]});
        let schema = describe_json(&value);
        match schema {
            JsonSchema::Object { fields } => {
                assert!(matches!(fields["x"], JsonSchema::Object { .. }));
                assert!(matches!(fields["list"], JsonSchema::Array { .. }));
            }
            _ => panic!("expected object schema"),
        }
    }

    #[test]
    fn get_by_path_descends_nested_objects() {
        let value = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get_by_path("a.b.c", &value), Some(&json!(42)));
    }

    #[test]
    fn get_by_path_strips_leading_dot() {
        let value = json!({"x": {"y": 5}});
        assert_eq!(get_by_path(".x.y", &value), Some(&json!(5)));
    }

    #[test]
    fn get_by_path_returns_none_for_missing_segment() {
        let value = json!({"x": {"y": 5}});
        assert_eq!(get_by_path("x.z", &value), None);
    }

    #[test]
    fn get_by_path_returns_none_when_intermediate_is_not_object() {
        let value = json!({"x": 5});
        assert_eq!(get_by_path("x.y", &value), None);
    }

    #[test]
    fn set_by_path_creates_intermediate_objects() {
        let mut root = json!({});
        set_by_path(".z", &mut root, json!(5));
        assert_eq!(root, json!({"z": 5}));

        let mut root2 = json!({});
        set_by_path("a.b.c", &mut root2, json!(1));
        assert_eq!(root2, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_by_path_overwrites_non_object_intermediate() {
        let mut root = json!({"a": 5});
        set_by_path("a.b", &mut root, json!(9));
        assert_eq!(root, json!({"a": {"b": 9}}));
    }

    #[test]
    fn data_flow_merge_example_two_stage_relation() {
        // upstream action emits {"x":{"y":5}}; relation maps .x.y -> .z
        let upstream = json!({"x": {"y": 5}});
        let mut composite = json!({});
        let from_value = get_by_path(".x.y", &upstream).expect("value present");
        set_by_path(".z", &mut composite, from_value.clone());
        assert_eq!(composite, json!({"z": 5}));
    }

    mod proptests {
        use super::super::*;
        use proptest::prelude::*;
        use serde_json::json;

        fn path_segment() -> impl Strategy<Value = String> {
            "[a-z]{1,6}"
        }

        proptest! {
            #[test]
            fn set_then_get_round_trips(
                segments in prop::collection::vec(path_segment(), 1..4),
                value in 0i64..1000,
            ) {
                let path = segments.join(".");
                let mut root = json!({});
                set_by_path(&path, &mut root, json!(value));
                prop_assert_eq!(get_by_path(&path, &root), Some(&json!(value)));
            }

            #[test]
            fn leading_dot_does_not_change_the_result(
                segments in prop::collection::vec(path_segment(), 1..4),
                value in 0i64..1000,
            ) {
                let path = segments.join(".");
                let dotted = format!(".{path}");
                let mut root = json!({});
                set_by_path(&path, &mut root, json!(value));
                prop_assert_eq!(get_by_path(&path, &root), get_by_path(&dotted, &root));
            }
        }
    }
}
