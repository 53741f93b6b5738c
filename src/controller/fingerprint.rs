//! Content fingerprints for change detection
//!
//! A fingerprint is the hex SHA-256 of a payload's canonical JSON form.
//! Object keys are sorted recursively before hashing so the digest never
//! depends on field or map insertion order.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compute the fingerprint of `payload`
pub fn fingerprint<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(payload)?);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
