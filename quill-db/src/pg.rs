//! PostgreSQL implementation of the pool seam over deadpool-postgres.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use quill_core::{Row, Value};
use tokio_postgres::types::ToSql;

use crate::error::{StoreError, StoreResult};
use crate::pool::{Connection, ConnectionPool, PoolStatus};

/// deadpool-postgres pool.
#[derive(Clone)]
pub struct PgPool {
    pool: Pool,
}

impl PgPool {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Close the pool. Outstanding connections are closed when returned.
    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl ConnectionPool for PgPool {
    type Connection = PgConnection;

    async fn acquire(&self) -> StoreResult<PgConnection> {
        let client = self.pool.get().await.map_err(StoreError::from)?;
        Ok(PgConnection { client })
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

/// Pooled PostgreSQL client. Statements are prepared once per connection.
pub struct PgConnection {
    client: Object,
}

fn sql_params(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn decode_row(row: &tokio_postgres::Row) -> StoreResult<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value: Value = row.try_get(idx)?;
        out.push(column.name(), value);
    }
    Ok(out)
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        let statement = self.client.prepare_cached(sql).await?;
        Ok(self.client.execute(&statement, &sql_params(params)).await?)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        let statement = self.client.prepare_cached(sql).await?;
        let rows = self.client.query(&statement, &sql_params(params)).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn batch_execute(&mut self, sql: &str) -> StoreResult<()> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    fn discard(self) {
        // Detach from the pool; dropping the client closes the socket.
        drop(Object::take(self.client));
    }
}
