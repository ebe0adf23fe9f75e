use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ATTACHMENTS_KEY: &str = "attachments";

/// Accumulated answers for one conversation, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Closed set of value kinds a conversation field can hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Python-style truthiness: empty strings, zero, false, empty collections
    /// and null count as absent.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(number) => number.as_f64().map(|value| value != 0.0).unwrap_or(true),
            Self::Text(value) => !value.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
        }
    }

    /// Scalar rendering used for flag checks and notification text.
    pub fn display_scalar(&self) -> Option<String> {
        match self {
            Self::Bool(value) => Some(value.to_string()),
            Self::Number(number) => Some(number.to_string()),
            Self::Text(value) => Some(value.clone()),
            Self::Null | Self::List(_) | Self::Map(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Merge an incoming partial submission into the accumulated mapping.
///
/// Every key overwrites, except `attachments`, which appends to the stored
/// list. A non-list attachment value is appended as a single item.
pub fn merge_fields(existing: &FieldMap, incoming: &FieldMap) -> FieldMap {
    let mut merged = existing.clone();
    for (key, value) in incoming {
        if key == ATTACHMENTS_KEY {
            let mut items = match merged.remove(key) {
                Some(FieldValue::List(items)) => items,
                _ => Vec::new(),
            };
            match value {
                FieldValue::List(new_items) => items.extend(new_items.iter().cloned()),
                FieldValue::Null => {}
                other => items.push(other.clone()),
            }
            merged.insert(key.clone(), FieldValue::List(items));
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

pub fn text_field<'a>(fields: &'a FieldMap, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(FieldValue::as_text).map(str::trim).filter(|value| !value.is_empty())
}

pub fn parse_field_map(raw: &str) -> Result<FieldMap, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(FieldMap::new());
    }
    serde_json::from_str(raw)
}

pub fn field_map_json(fields: &FieldMap) -> String {
    serde_json::to_string(fields).unwrap_or_else(|_| "{}".to_string())
}
