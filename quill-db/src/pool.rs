//! Connection pool seam.
//!
//! The store is generic over [`ConnectionPool`] so it can run against
//! PostgreSQL in production and a scripted in-memory pool in tests. A
//! connection goes back to its pool when dropped; [`Connection::discard`]
//! closes it instead.

use async_trait::async_trait;
use quill_core::{Row, Value};

use crate::error::StoreResult;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently open, idle or in use.
    pub size: usize,
    /// Idle connections ready to hand out.
    pub available: usize,
    /// Tasks blocked in `acquire`.
    pub waiting: usize,
}

/// A bounded pool of database connections.
#[async_trait]
pub trait ConnectionPool: Clone + Send + Sync + 'static {
    type Connection: Connection;

    /// Take a connection, waiting if the pool is saturated.
    async fn acquire(&self) -> StoreResult<Self::Connection>;

    fn status(&self) -> PoolStatus;
}

/// One pooled database connection.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Run a statement and return the number of rows affected.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<u64>;

    /// Run a statement and return every row.
    async fn query(&mut self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>>;

    /// First row, if any. Extra rows are ignored.
    async fn query_opt(&mut self, sql: &str, params: &[Value]) -> StoreResult<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// First column of the first row, or `Value::Null` when there is none.
    async fn query_scalar(&mut self, sql: &str, params: &[Value]) -> StoreResult<Value> {
        Ok(self
            .query_opt(sql, params)
            .await?
            .and_then(Row::into_first)
            .unwrap_or(Value::Null))
    }

    /// Run one or more parameterless statements (transaction control, DDL).
    async fn batch_execute(&mut self, sql: &str) -> StoreResult<()>;

    /// Close the connection instead of returning it to the pool.
    fn discard(self);
}
