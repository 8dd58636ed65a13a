//! Opaque entity identifiers used by the cache's entity index.
//!
//! An entity id is whatever string identifies one domain object. Most are a
//! single snowflake, but lookups keyed on several columns (a prefix keyed on
//! scope and owner, an AFK record keyed on user and guild) use a composite
//! built by joining the components with [`COMPOSITE_SEPARATOR`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Separator placed between the components of a composite entity id.
pub const COMPOSITE_SEPARATOR: char = ':';

/// Opaque identifier of a cached domain entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a composite id from several components, in order.
    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = String::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push(COMPOSITE_SEPARATOR);
            }
            out.push_str(part.as_ref());
        }
        Self(out)
    }

    /// Derive an id from a scalar value. Only values that can plausibly
    /// identify a row qualify: integers, text and UUIDs.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(Self(v.to_string())),
            Value::Text(v) if !v.is_empty() => Some(Self(v.clone())),
            Value::Uuid(v) => Some(Self(v.to_string())),
            _ => None,
        }
    }

    /// Composite id from several scalar values; `None` if any component
    /// does not qualify.
    pub fn composite_from_values<'a, I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let parts = values
            .into_iter()
            .map(|v| Self::from_value(v).map(|id| id.0))
            .collect::<Option<Vec<_>>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(Self::composite(parts))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}
