//! Accessors for JSON-encoded state and config objects.
//!
//! The orchestrator sends every value as JSON. Null and absent attributes
//! are treated the same, and empty strings count as unset.

use serde_json::{json, Map, Value};

use crate::error::ProviderError;

/// Whether `attr` is absent or null.
pub fn is_unset(value: &Value, attr: &str) -> bool {
    matches!(value.get(attr), None | Some(Value::Null))
}

/// A non-empty string attribute.
pub fn str_attr<'a>(value: &'a Value, attr: &str) -> Option<&'a str> {
    value
        .get(attr)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// A string attribute that must be set.
pub fn required_str<'a>(value: &'a Value, attr: &str) -> Result<&'a str, ProviderError> {
    str_attr(value, attr)
        .ok_or_else(|| ProviderError::Validation(format!("missing required attribute '{}'", attr)))
}

/// A known boolean attribute.
pub fn bool_attr(value: &Value, attr: &str) -> Option<bool> {
    value.get(attr).and_then(Value::as_bool)
}

/// `true` only when the attribute is known and set.
pub fn flag(value: &Value, attr: &str) -> bool {
    bool_attr(value, attr).unwrap_or(false)
}

/// A set of strings, sorted. Non-string members are skipped.
pub fn string_set(value: &Value, attr: &str) -> Option<Vec<String>> {
    let mut items: Vec<String> = value
        .get(attr)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    items.sort();
    Some(items)
}

/// A single nested block, when present.
pub fn block<'a>(value: &'a Value, attr: &str) -> Option<&'a Map<String, Value>> {
    value.get(attr).and_then(Value::as_object)
}

/// An optional string as a JSON value.
pub fn opt_str(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// An optional string as a JSON value, with empty strings mapped to null.
pub fn non_empty(value: Option<&str>) -> Value {
    opt_str(value.filter(|s| !s.is_empty()))
}

/// Sorted list, or null when empty.
pub fn sorted_list(items: Option<&[String]>) -> Value {
    match items {
        Some(items) if !items.is_empty() => {
            let mut items = items.to_vec();
            items.sort();
            json!(items)
        },
        _ => Value::Null,
    }
}

/// Set `attr` on an object value. Non-objects are left untouched.
pub fn set(state: &mut Value, attr: &str, value: impl Into<Value>) {
    if let Value::Object(map) = state {
        map.insert(attr.to_string(), value.into());
    }
}

/// Copy `attr` from `from` into `state` when it is set there.
pub fn keep(state: &mut Value, from: &Value, attr: &str) {
    if !is_unset(from, attr) {
        set(state, attr, from[attr].clone());
    }
}
