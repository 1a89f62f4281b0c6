// Copyright (c) 2024 SenseLink Contributors
// SPDX-License-Identifier: MPL-2.0

//! Slash-separated JSON keypath lookups, used by the Home Assistant and MQTT
//! data sources to pull a state or attribute value out of an arbitrarily
//! nested message without hard-coding its shape.

use serde_json::Value;

/// Looks up a `/`-separated path in a JSON value, e.g. `"new_state/attributes/brightness"`.
///
/// Returns `None` if any segment along the path is missing or not an object.
/// An empty path returns the root value itself.
pub fn safekey<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('/').try_fold(value, |current, segment| {
        if segment.is_empty() {
            Some(current)
        } else {
            current.get(segment)
        }
    })
}

/// Like [`safekey`], but parses the result as an `f64`.
///
/// Returns `None` if the path is missing, or the value is not a number and
/// not a string that parses as one.
pub fn get_float_at_path(value: &Value, path: &str) -> Option<f64> {
    match safekey(value, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}
