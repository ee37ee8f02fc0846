//! Request hashing.
//!
//! Two calls carry the same idempotency key legitimately only when they are
//! the same request. The hash covers the semantically relevant request
//! fields, canonicalized so JSON key order cannot produce spurious
//! conflicts.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a canonicalized request body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHash(String);

impl RequestHash {
    /// Hash the semantically relevant request fields.
    pub fn of(request: &JsonValue) -> Self {
        let mut canonical = String::new();
        write_canonical(request, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Wrap a hash previously stored in a claim row.
    pub fn from_stored(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RequestHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic JSON encoding: object keys sorted recursively, no
/// insignificant whitespace.
fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a = json!({"amount": 1000, "currency": "USD", "plan": "pro"});
        let b = json!({"plan": "pro", "currency": "USD", "amount": 1000});
        assert_eq!(RequestHash::of(&a), RequestHash::of(&b));
    }

    #[test]
    fn nested_objects_are_canonicalized_too() {
        let a = json!({"outer": {"b": 2, "a": 1}});
        let b = json!({"outer": {"a": 1, "b": 2}});
        assert_eq!(RequestHash::of(&a), RequestHash::of(&b));
    }

    #[test]
    fn different_content_hashes_differently() {
        let a = json!({"amount": 1000});
        let b = json!({"amount": 1001});
        assert_ne!(RequestHash::of(&a), RequestHash::of(&b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"items": [1, 2]});
        let b = json!({"items": [2, 1]});
        assert_ne!(RequestHash::of(&a), RequestHash::of(&b));
    }
}
