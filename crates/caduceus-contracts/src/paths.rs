//! Dot-notation path access into JSON values.
//!
//! Policy conditions, workflow templates, and the security pipeline all
//! address fields by dotted path (e.g. `"actor.attributes.purpose"`).
//! These helpers keep that behavior identical everywhere.

use serde_json::Value;

/// Resolve a dotted path against a JSON value.
///
/// Returns `None` when any segment is missing or the resolved value is
/// JSON `null`.
pub fn resolve<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) if !v.is_null() => current = v,
            _ => return None,
        }
    }
    Some(current)
}

/// Replace the value at a dotted path, returning `false` when the parent
/// object does not exist. Intermediate objects are never created — a
/// transformation targeting a missing field is a no-op for the caller to
/// log, not a structural edit.
pub fn set(value: &mut Value, path: &str, new_value: Value) -> bool {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();

    for segment in &segments[..segments.len() - 1] {
        match current.get_mut(segment) {
            Some(v) => current = v,
            None => return false,
        }
    }

    let last = segments[segments.len() - 1];
    match current.as_object_mut() {
        Some(map) if map.contains_key(last) => {
            map.insert(last.to_string(), new_value);
            true
        }
        _ => false,
    }
}

/// Walk a JSON value and collect every leaf as `(dotted_path, value)`.
///
/// Arrays are treated as leaves — field-level classification and
/// transformation operate on named fields, not array elements.
pub fn flatten(value: &Value) -> Vec<(String, &Value)> {
    let mut leaves = Vec::new();
    collect(value, String::new(), &mut leaves);
    leaves
}

fn collect<'v>(value: &'v Value, prefix: String, leaves: &mut Vec<(String, &'v Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect(child, path, leaves);
            }
        }
        _ => {
            if !prefix.is_empty() {
                leaves.push((prefix, value));
            }
        }
    }
}
