//! One-time schema bootstrap.

use crate::error::StoreResult;
use crate::pool::{Connection, ConnectionPool};
use crate::store::Store;

/// DDL for every table the bot uses.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Apply [`SCHEMA_SQL`] and flush the cache.
///
/// Runs outside the cache path on a single connection. Safe to call on
/// every startup.
pub async fn bootstrap<P: ConnectionPool>(store: &Store<P>) -> StoreResult<()> {
    let mut conn = store.pool().acquire().await?;
    conn.batch_execute(SCHEMA_SQL).await?;
    drop(conn);

    let flushed = store.flush();
    tracing::info!(flushed, "Database schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_cache::TableClassifier;

    #[test]
    fn test_schema_creates_known_tables() {
        let classifier = TableClassifier::default();
        for table in ["guilds", "users", "prefixes", "tags", "afk"] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing {table}"
            );
            assert!(classifier.is_known_table(table));
        }
        assert!(SCHEMA_SQL.contains("idx_prefixes_lookup"));
    }
}
