// src/utils/canonical.rs
//! Canonical serialization of credential payloads.
//!
//! Produces the byte sequence that is hashed at issuance and re-hashed at
//! verification. Object keys are sorted lexicographically at every nesting
//! level and the output is compact JSON, so two logically equal payloads give
//! identical bytes whatever their key insertion order.
//!
//! Timestamps must already be normalized when they reach this module. The
//! payload projection in `models::credential` handles that.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EncodingError;

/// Bytes produced by [`canonicalize`]. The inner buffer is private so digest
/// code can only ever be handed canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Serializes `payload` into its canonical form.
///
/// # Errors
/// [`EncodingError::Serialization`] if the value cannot be represented as JSON
/// (for example a map with non-string keys).
pub fn canonicalize<T: Serialize + ?Sized>(payload: &T) -> Result<CanonicalBytes, EncodingError> {
    let value = serde_json::to_value(payload)?;
    let sorted = sort_keys(value);
    Ok(CanonicalBytes(serde_json::to_vec(&sorted)?))
}

/// Rebuilds every object with its keys in lexicographic order.
///
/// The rebuild does not rely on `serde_json::Map`'s backing collection, which
/// keeps insertion order when `preserve_order` is enabled anywhere in the build.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
