//! Open metadata bag attached to journals and postings.
//!
//! An order-irrelevant string-keyed map of primitive values. No fixed schema
//! is imposed, but the bag must be serializable and bounded in size so a
//! single journal cannot smuggle arbitrary payloads into the ledger tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::LedgerError;

/// Bounds enforced on every metadata bag.
const MAX_KEYS: usize = 64;
const MAX_KEY_BYTES: usize = 64;
const MAX_STRING_BYTES: usize = 1024;

/// A primitive metadata value. Nested objects and arrays are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Bounded key/value bag. Keys are kept sorted (BTreeMap) so serialized
/// output is deterministic, which matters for request hashing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair, enforcing the size bounds.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<(), LedgerError> {
        let key = key.into();
        if key.is_empty() || key.len() > MAX_KEY_BYTES {
            return Err(LedgerError::invalid_argument(format!(
                "metadata key must be 1..={MAX_KEY_BYTES} bytes"
            )));
        }
        let value = value.into();
        if let MetadataValue::String(s) = &value {
            if s.len() > MAX_STRING_BYTES {
                return Err(LedgerError::invalid_argument(format!(
                    "metadata value for {key:?} exceeds {MAX_STRING_BYTES} bytes"
                )));
            }
        }
        if !self.0.contains_key(&key) && self.0.len() >= MAX_KEYS {
            return Err(LedgerError::invalid_argument(format!(
                "metadata bag exceeds {MAX_KEYS} keys"
            )));
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// Parse an untrusted JSON object into a bounded bag.
    ///
    /// Used at storage and wire boundaries where metadata arrives as raw
    /// JSON; anything non-primitive or over the bounds is rejected.
    pub fn from_json(value: &JsonValue) -> Result<Self, LedgerError> {
        let obj = value.as_object().ok_or_else(|| {
            LedgerError::invalid_argument("metadata must be a JSON object")
        })?;
        let mut bag = Self::new();
        for (key, raw) in obj {
            let value = match raw {
                JsonValue::Bool(b) => MetadataValue::Bool(*b),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(i) => MetadataValue::Integer(i),
                    None => MetadataValue::Float(n.as_f64().ok_or_else(|| {
                        LedgerError::invalid_argument(format!(
                            "metadata number for {key:?} is out of range"
                        ))
                    })?),
                },
                JsonValue::String(s) => MetadataValue::String(s.clone()),
                JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => {
                    return Err(LedgerError::invalid_argument(format!(
                        "metadata value for {key:?} must be a primitive"
                    )));
                }
            };
            bag.insert(key.clone(), value)?;
        }
        Ok(bag)
    }

    pub fn to_json(&self) -> JsonValue {
        // Serialization of primitives cannot fail.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_json() {
        let mut bag = Metadata::new();
        bag.insert("provider_event", "evt_123").unwrap();
        bag.insert("attempt", 2i64).unwrap();
        bag.insert("live", true).unwrap();

        let back = Metadata::from_json(&bag.to_json()).unwrap();
        assert_eq!(back, bag);
    }

    #[test]
    fn rejects_nested_values() {
        let err = Metadata::from_json(&json!({"nested": {"a": 1}})).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        let err = Metadata::from_json(&json!({"list": [1, 2]})).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn enforces_key_count_bound() {
        let mut bag = Metadata::new();
        for i in 0..MAX_KEYS {
            bag.insert(format!("k{i}"), i as i64).unwrap();
        }
        let err = bag.insert("one_too_many", 1i64).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        // Overwriting an existing key is still allowed at the bound.
        bag.insert("k0", 99i64).unwrap();
    }

    #[test]
    fn enforces_value_size_bound() {
        let mut bag = Metadata::new();
        let oversized = "x".repeat(MAX_STRING_BYTES + 1);
        let err = bag.insert("big", oversized).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }
}
