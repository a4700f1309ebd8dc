// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coercion of raw remote payloads into canonical entities.
//!
//! The backend answers in one of two envelopes, and which one a given
//! endpoint uses is not stable:
//!
//! ```text
//! list envelope:   {"identifier": "scoutid", "items": [ {...}, {...} ]}
//! keyed envelope:  {"identifier": "scoutid", "data": { "123": {...}, "456": {...} }}
//! ```
//!
//! [`envelope_rows`] branches on which of those keys is present, never on
//! the endpoint. Bare arrays (as written by older offline caches) are
//! accepted too.

pub mod age;
pub mod members;
pub mod records;

pub use age::{display_age, parse_date};
pub use members::{merge_members, normalize_members};
pub use records::{dedupe_by_key, normalize_attendance, normalize_current_user, normalize_events, normalize_sections};

use serde_json::{Map, Value};

use crate::error::SyncError;

/// One row pulled out of an envelope, with the map key it was filed under
/// when the envelope was keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub key: Option<String>,
    pub fields: Map<String, Value>,
}

/// Flatten either envelope shape into rows. Non-object rows are skipped.
pub fn envelope_rows(payload: &Value) -> Result<Vec<RawRow>, SyncError> {
    match payload {
        Value::Array(items) => Ok(list_rows(items)),
        Value::Object(obj) => {
            if let Some(items) = obj.get("items") {
                return match items {
                    Value::Array(items) => Ok(list_rows(items)),
                    Value::Null => Ok(Vec::new()),
                    other => Err(SyncError::DecodeError(format!(
                        "'items' is {}, expected an array",
                        type_name(other)
                    ))),
                };
            }
            match obj.get("data") {
                Some(Value::Object(keyed)) => Ok(keyed_rows(keyed)),
                Some(Value::Array(items)) => Ok(list_rows(items)),
                Some(Value::Null) => Ok(Vec::new()),
                Some(other) => Err(SyncError::DecodeError(format!(
                    "'data' is {}, expected an object or array",
                    type_name(other)
                ))),
                None => Err(SyncError::DecodeError(
                    "payload has neither 'items' nor 'data'".to_string(),
                )),
            }
        }
        Value::Null => Ok(Vec::new()),
        other => Err(SyncError::DecodeError(format!(
            "payload is {}, expected an envelope",
            type_name(other)
        ))),
    }
}

fn list_rows(items: &[Value]) -> Vec<RawRow> {
    items
        .iter()
        .filter_map(|item| item.as_object())
        .map(|fields| RawRow { key: None, fields: fields.clone() })
        .collect()
}

fn keyed_rows(keyed: &Map<String, Value>) -> Vec<RawRow> {
    keyed
        .iter()
        .filter_map(|(key, item)| {
            item.as_object().map(|fields| RawRow { key: Some(key.clone()), fields: fields.clone() })
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Render a scalar as trimmed text. Empty strings, nulls and containers
/// are absent.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl RawRow {
    /// First present, non-empty field among `names`.
    #[must_use]
    pub fn text(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.fields.get(*name).and_then(scalar_text))
    }

    /// Like [`text`](Self::text), falling back to the envelope key.
    #[must_use]
    pub fn id(&self, names: &[&str]) -> Option<String> {
        self.text(names).or_else(|| self.key.clone().filter(|k| !k.trim().is_empty()))
    }

    /// Numeric id; accepts numbers and numeric strings.
    #[must_use]
    pub fn numeric_id(&self, names: &[&str]) -> Option<u64> {
        self.id(names).and_then(|s| s.parse::<u64>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_envelope() {
        let rows = envelope_rows(&json!({"identifier": "scoutid", "items": [{"scoutid": 1}, {"scoutid": 2}]})).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].key.is_none());
    }

    #[test]
    fn test_keyed_envelope_keeps_keys() {
        let rows = envelope_rows(&json!({"identifier": "scoutid", "data": {"10": {"firstname": "A"}}})).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.as_deref(), Some("10"));
        assert_eq!(rows[0].numeric_id(&["scoutid"]), Some(10));
    }

    #[test]
    fn test_bare_array_and_data_array() {
        assert_eq!(envelope_rows(&json!([{"id": 1}, "junk", {"id": 2}])).unwrap().len(), 2);
        assert_eq!(envelope_rows(&json!({"data": [{"id": 1}]})).unwrap().len(), 1);
    }

    #[test]
    fn test_null_means_nothing() {
        assert!(envelope_rows(&Value::Null).unwrap().is_empty());
        assert!(envelope_rows(&json!({"items": null})).unwrap().is_empty());
    }

    #[test]
    fn test_unrecognised_shapes_are_decode_errors() {
        assert!(matches!(envelope_rows(&json!({"rows": []})), Err(SyncError::DecodeError(_))));
        assert!(matches!(envelope_rows(&json!({"items": "x"})), Err(SyncError::DecodeError(_))));
        assert!(matches!(envelope_rows(&json!(42)), Err(SyncError::DecodeError(_))));
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&json!("  hi ")), Some("hi".to_string()));
        assert_eq!(scalar_text(&json!(12)), Some("12".to_string()));
        assert_eq!(scalar_text(&json!("")), None);
        assert_eq!(scalar_text(&json!("   ")), None);
        assert_eq!(scalar_text(&json!(null)), None);
        assert_eq!(scalar_text(&json!({"a": 1})), None);
    }

    #[test]
    fn test_id_prefers_field_over_key() {
        let row = RawRow {
            key: Some("99".into()),
            fields: json!({"scoutid": "7"}).as_object().unwrap().clone(),
        };
        assert_eq!(row.numeric_id(&["scoutid"]), Some(7));
    }
}
