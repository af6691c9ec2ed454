//! Translation between the engine's camelCase attribute names and the
//! snake_case column names the remote store speaks.
//!
//! Only top-level attribute names are translated. Nested values (JSON
//! columns) are passed through untouched.

use serde_json::{Map, Value};

/// Convert `createdAt` to `created_at`.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.char_indices() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Convert `created_at` to `createdAt`.
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn rename_keys(value: Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (rename(&key), value))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Engine representation to wire representation.
pub fn to_wire(value: Value) -> Value {
    rename_keys(value, camel_to_snake)
}

/// Wire representation to engine representation.
pub fn from_wire(value: Value) -> Value {
    rename_keys(value, snake_to_camel)
}

/// Read the `id` attribute from a wire record.
pub fn wire_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

/// Read the `updated_at` attribute from a wire record. Missing or malformed
/// values read as zero, which loses every recency comparison.
pub fn wire_updated_at(value: &Value) -> u64 {
    value.get("updated_at").and_then(Value::as_u64).unwrap_or(0)
}
