//! Quill DB - Cached Data Access
//!
//! The bot's data-access layer: a [`Store`] facade over a PostgreSQL
//! connection pool with a read-through query cache in front of it.
//!
//! # Architecture
//!
//! ```text
//! command handlers ──► BotDb / PrefixResolver
//!                           │
//!                           ▼
//!                        Store ──► QueryCache (quill-cache)
//!                           │
//!                           ▼
//!                  ConnectionPool (deadpool-postgres)
//! ```
//!
//! Reads are answered from the cache when possible. Writes invalidate every
//! cached result for the table (or entities) they touch. Transactions run
//! on a dedicated connection outside the cache and invalidate on commit.
//!
//! # Example
//!
//! ```ignore
//! let store = Store::connect(StoreConfig::from_env()).await?;
//! let db = BotDb::new(store.clone());
//!
//! db.upsert_guild(guild_id, "quill testing").await?;
//! let guild = db.get_guild(guild_id).await?; // miss, then cached
//! let guild = db.get_guild(guild_id).await?; // hit
//! ```

pub mod config;
pub mod error;
mod invalidation;
pub mod pg;
pub mod pool;
pub mod prefixes;
pub mod repo;
pub mod schema;
pub mod statement;
pub mod store;
pub mod telemetry;
pub mod transaction;

pub use config::{DbConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use pg::{PgConnection, PgPool};
pub use pool::{Connection, ConnectionPool, PoolStatus};
pub use prefixes::{validate_prefix, PrefixResolver, MAX_PREFIX_LEN};
pub use repo::{Afk, BotDb, Guild, PrefixScope, Tag, User};
pub use schema::bootstrap;
pub use statement::Statement;
pub use store::Store;
pub use telemetry::{init_tracing, TelemetryConfig};
pub use transaction::TransactionScope;

// Re-exported so callers need only this crate.
pub use quill_cache::{CacheConfig, CacheHint, CacheStats, ClassifierConfig, InvalidationScope};
pub use quill_core::{EntityId, FromValue, Row, Value};
