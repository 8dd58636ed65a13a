//! Cache keys derived from query text and bound parameters.
//!
//! A fingerprint is the hex SHA-256 of the SQL text followed by a canonical
//! rendering of every parameter. The rendering is type-tagged and
//! length-prefixed, so `Int(1)` and `Text("1")` differ, and no sequence of
//! parameters can be re-split into another sequence with the same bytes.

use std::fmt;

use quill_core::{PayloadShape, Value};
use sha2::{Digest, Sha256};

/// Length of every fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Key under which a cached result is stored.
///
/// Usually produced by [`fingerprint`], but any string is accepted so
/// callers can cache under readable keys such as `users:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Derive the cache key for `query` executed with `params`.
pub fn fingerprint(query: &str, params: &[Value]) -> CacheKey {
    let mut hasher = Sha256::new();
    feed(&mut hasher, query, params);
    CacheKey(hex::encode(hasher.finalize()))
}

/// Like [`fingerprint`], but also keyed on the result shape so the same SQL
/// fetched as a row and as a list never shares an entry.
pub fn shaped_fingerprint(shape: PayloadShape, query: &str, params: &[Value]) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(shape.tag().as_bytes());
    hasher.update([0u8]);
    feed(&mut hasher, query, params);
    CacheKey(hex::encode(hasher.finalize()))
}

fn feed(hasher: &mut Sha256, query: &str, params: &[Value]) {
    hasher.update((query.len() as u64).to_be_bytes());
    hasher.update(query.as_bytes());
    hasher.update((params.len() as u64).to_be_bytes());
    for param in params {
        let rendered = render(param);
        hasher.update(param.type_name().as_bytes());
        hasher.update(b":");
        hasher.update((rendered.len() as u64).to_be_bytes());
        hasher.update(rendered.as_bytes());
    }
}

/// Deterministic textual form of a parameter.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        // Bit pattern, so -0.0 and 0.0 stay distinct and NaN is stable.
        Value::Float(v) => format!("{:016x}", v.to_bits()),
        Value::Text(v) => v.clone(),
        Value::Json(v) => v.to_string(),
        Value::Timestamp(v) => v.to_rfc3339(),
        Value::Uuid(v) => v.to_string(),
    }
}
