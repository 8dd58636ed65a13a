//! Quill Cache - Read-Through Query Cache
//!
//! In-memory TTL cache for query results with two secondary indices, one by
//! table and one by entity id, so a write can drop every cached result that
//! depends on what it touched without scanning the whole cache.
//!
//! # Components
//!
//! - [`fingerprint`]: stable keys derived from SQL text and bound parameters
//! - [`QueryCache`]: the TTL store and its indices, bounded by capacity
//! - [`TableClassifier`]: infers the table and entity ids of free-form SQL
//! - [`CacheHint`]: explicit table/entity information supplied by callers
//! - [`spawn_sweeper`]: background purge of expired entries
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryCache::new(CacheConfig::default());
//! let key = fingerprint("SELECT * FROM users WHERE id = $1", &[Value::Int(1)]);
//! cache.set(key.clone(), CachePayload::Row(row), "users", &[EntityId::from(1)]);
//!
//! assert!(cache.get(&key).is_some());
//! cache.invalidate_entity(&EntityId::from(1));
//! assert!(cache.get(&key).is_none());
//! ```

pub mod classify;
pub mod clock;
pub mod config;
pub mod engine;
pub mod fingerprint;
pub mod hint;
pub mod stats;
pub mod sweeper;

pub use classify::{
    Classification, ClassifierConfig, QueryShape, StatementKind, TableClassifier,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, MAX_CACHE_TTL};
pub use engine::QueryCache;
pub use fingerprint::{fingerprint, shaped_fingerprint, CacheKey};
pub use hint::{CacheHint, InvalidationScope};
pub use stats::CacheStats;
pub use sweeper::spawn_sweeper;
