//! Dynamically typed values and owned result rows.
//!
//! Statements are free-form SQL, so parameters and results cannot be typed
//! statically. `Value` covers the column types the bot schema uses; `Row`
//! keeps column order and names so it can be cached and decoded later
//! without holding on to a connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ValueError, ValueResult};

/// A single SQL value, used both for bound parameters and decoded columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    /// Any integer column. Narrower PostgreSQL integer types are widened on
    /// decode and narrowed (with a range check) on encode.
    Int(i64),
    Float(f64),
    Text(String),
    Json(JsonValue),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    /// Short name of the variant, used in error messages and fingerprints.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// TYPED EXTRACTION
// ============================================================================

/// Conversion from a borrowed `Value` into an owned Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> ValueResult<Self>;
}

fn mismatch<T>(expected: &'static str, got: &Value) -> ValueResult<T> {
    Err(ValueError::TypeMismatch {
        expected,
        got: got.type_name(),
    })
}

impl FromValue for Value {
    fn from_value(value: &Value) -> ValueResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => mismatch("bool", other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Int(v) => Ok(*v),
            other => mismatch("int", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> ValueResult<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| ValueError::OutOfRange {
            target: "i32",
            value: wide.to_string(),
        })
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> ValueResult<Self> {
        let wide = i64::from_value(value)?;
        u64::try_from(wide).map_err(|_| ValueError::OutOfRange {
            target: "u64",
            value: wide.to_string(),
        })
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => mismatch("float", other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            other => mismatch("text", other),
        }
    }
}

impl FromValue for JsonValue {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            other => mismatch("json", other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Timestamp(v) => Ok(*v),
            other => mismatch("timestamp", other),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Uuid(v) => Ok(*v),
            other => mismatch("uuid", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> ValueResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

// ============================================================================
// ROW
// ============================================================================

/// An owned result row: ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append, mostly for fixtures.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((column.into(), value.into()));
    }

    /// Look up a column by name. Names are compared exactly; PostgreSQL
    /// already folds unquoted identifiers to lower case.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Decode a column into a Rust type.
    pub fn try_get<T: FromValue>(&self, column: &str) -> ValueResult<T> {
        let value = self.get(column).ok_or_else(|| ValueError::MissingColumn {
            column: column.to_string(),
        })?;
        T::from_value(value).map_err(|err| match (value, err) {
            (Value::Null, ValueError::TypeMismatch { .. }) => ValueError::UnexpectedNull {
                column: column.to_string(),
            },
            (_, err) => err,
        })
    }

    /// First column, as returned by scalar queries.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    pub fn into_first(self) -> Option<Value> {
        self.columns.into_iter().next().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}
