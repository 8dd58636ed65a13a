//! Quill Core - Value Types
//!
//! Plain data shared by every Quill crate: the dynamically typed `Value`
//! that travels to and from the database, owned result `Row`s, opaque
//! `EntityId`s used for cache invalidation, and the `CachePayload` union
//! that the cache stores.
//!
//! This crate contains no I/O. The optional `postgres` feature adds wire
//! conversions so `Value` can be bound to and decoded from PostgreSQL.

pub mod entity;
pub mod error;
pub mod payload;
pub mod value;

#[cfg(feature = "postgres")]
mod pg;

pub use entity::{EntityId, COMPOSITE_SEPARATOR};
pub use error::{ValueError, ValueResult};
pub use payload::{CachePayload, PayloadShape};
pub use value::{FromValue, Row, Value};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
