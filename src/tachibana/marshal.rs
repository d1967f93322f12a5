//! Flat string map marshaling
//!
//! The provider accepts only string-typed parameters: every request is
//! transmitted as a flat `key -> string` map regardless of the semantic type
//! of each field, and responses come back as generic JSON maps that need to
//! be restored into typed shapes. `to_flat_map` and `from_map` are the two
//! halves of that contract. Request envelopes are embedded with
//! `#[serde(flatten)]`, so their fields arrive here already hoisted onto the
//! parent object.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::common::errors::{ClientError, Result};

/// Flatten a typed request value into the provider's flat string map.
///
/// Scalars are rendered textually (`42` -> `"42"`, `true` -> `"true"`),
/// lists as a bracketed comma-joined form (`[a, b]`), and `null` fields are
/// omitted. A non-struct value, or a nested object that was not flattened
/// into the parent, is a programming error and fails fast.
pub fn to_flat_map<T: Serialize>(value: &T) -> Result<BTreeMap<String, String>> {
    let json = serde_json::to_value(value).map_err(|e| ClientError::Marshal(e.to_string()))?;

    let obj = match json {
        Value::Object(obj) => obj,
        other => {
            return Err(ClientError::Marshal(format!(
                "expected a struct-shaped value, got {}",
                type_name(&other)
            )))
        }
    };

    let mut flat = BTreeMap::new();
    for (key, val) in obj {
        match val {
            Value::Null => continue,
            Value::Object(_) => {
                return Err(ClientError::Marshal(format!(
                    "field {} is a nested object; embed it with #[serde(flatten)]",
                    key
                )))
            }
            other => {
                flat.insert(key, render_scalar(&other)?);
            }
        }
    }
    Ok(flat)
}

/// Restore a typed value from a generic decoded response map.
///
/// Fields absent from the map are left at their default; coercion failures
/// are reported with serde's field context rather than silently zeroed.
pub fn from_map<T: DeserializeOwned>(map: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(map.clone()))
        .map_err(|e| ClientError::Marshal(format!("response restore failed: {}", e)))
}

/// Deserializer for list fields whose source key may be absent or not
/// list-shaped; both cases yield an empty vec instead of an error.
pub fn lenient_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match serde_json::from_value(item) {
                    Ok(v) => out.push(v),
                    Err(e) => return Err(serde::de::Error::custom(e)),
                }
            }
            Ok(out)
        }
        _ => Ok(Vec::new()),
    }
}

/// Format a timestamp the way the provider expects in `p_sd_date`:
/// `YYYY.MM.DD-HH:MM:SS.mmm`
pub fn format_sd_date(t: DateTime<Local>) -> String {
    t.format("%Y.%m.%d-%H:%M:%S%.3f").to_string()
}

fn render_scalar(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                rendered.push(render_scalar(item)?);
            }
            Ok(format!("[{}]", rendered.join(", ")))
        }
        Value::Object(_) => Err(ClientError::Marshal(
            "object values cannot be rendered as a flat string".to_string(),
        )),
        Value::Null => Ok(String::new()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
