//! Result shapes stored by the cache.

use crate::value::{Row, Value};

/// Which primitive produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadShape {
    Row,
    Rows,
    Scalar,
    Executed,
}

impl PayloadShape {
    /// Stable tag mixed into cache fingerprints.
    pub fn tag(&self) -> &'static str {
        match self {
            PayloadShape::Row => "row",
            PayloadShape::Rows => "rows",
            PayloadShape::Scalar => "scalar",
            PayloadShape::Executed => "executed",
        }
    }
}

/// A cached query result.
///
/// Each variant matches one store primitive, so a cached value can only be
/// handed back to a caller expecting the same shape.
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    /// Result of `fetch_one`.
    Row(Row),
    /// Result of `fetch_all`.
    Rows(Vec<Row>),
    /// Result of `fetch_scalar`.
    Scalar(Value),
    /// Rows affected by `execute`.
    Executed(u64),
}

impl CachePayload {
    pub fn shape(&self) -> PayloadShape {
        match self {
            CachePayload::Row(_) => PayloadShape::Row,
            CachePayload::Rows(_) => PayloadShape::Rows,
            CachePayload::Scalar(_) => PayloadShape::Scalar,
            CachePayload::Executed(_) => PayloadShape::Executed,
        }
    }

    /// Empty payloads are never cached: an empty list, a NULL scalar, or a
    /// row with no columns. "No rows" is indistinguishable from "not cached".
    pub fn is_empty(&self) -> bool {
        match self {
            CachePayload::Row(row) => row.is_empty(),
            CachePayload::Rows(rows) => rows.is_empty(),
            CachePayload::Scalar(value) => value.is_null(),
            CachePayload::Executed(_) => false,
        }
    }

    /// Rows carried by the payload, for entity extraction.
    pub fn rows(&self) -> &[Row] {
        match self {
            CachePayload::Row(row) => std::slice::from_ref(row),
            CachePayload::Rows(rows) => rows,
            CachePayload::Scalar(_) | CachePayload::Executed(_) => &[],
        }
    }
}
