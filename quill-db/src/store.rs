//! Store Facade
//!
//! The single entry point command handlers use to reach the database. Four
//! primitives (`execute`, `fetch_all`, `fetch_one`, `fetch_scalar`) route
//! each statement through the read path or the write path:
//!
//! - **Read path**: fingerprint, consult the cache, and on a miss acquire a
//!   connection, run the query, classify it and populate the cache.
//! - **Write path**: run the statement, then invalidate every cached result
//!   that depends on the table (or entities) it touched.
//!
//! Once a connection has been acquired the remaining work runs on a spawned
//! task, so a caller that gives up on the future cannot leave a connection
//! half-used, a populate half-done, or a write without its invalidation.

use std::sync::Arc;

use quill_cache::{
    shaped_fingerprint, spawn_sweeper, CacheConfig, CacheHint, CacheStats, ClassifierConfig,
    QueryCache, StatementKind, TableClassifier,
};
use quill_core::{CachePayload, EntityId, PayloadShape, Row, Value};
use tokio::sync::watch;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::invalidation::Invalidation;
use crate::pg::PgPool;
use crate::pool::{Connection, ConnectionPool, PoolStatus};
use crate::statement::Statement;
use crate::transaction::TransactionScope;

/// Cached data-access facade over a connection pool.
///
/// Cheap to clone; clones share the pool, the cache and the sweeper.
#[derive(Clone)]
pub struct Store<P: ConnectionPool> {
    pool: P,
    cache: Arc<QueryCache>,
    classifier: Arc<TableClassifier>,
    /// Dropping the last clone closes the channel and stops the sweeper.
    sweeper_shutdown: Option<Arc<watch::Sender<bool>>>,
}

impl<P: ConnectionPool> Store<P> {
    /// Build a store with a fresh cache.
    pub fn new(pool: P, cache: CacheConfig, classifier: ClassifierConfig) -> Self {
        Self::with_cache(
            pool,
            Arc::new(QueryCache::new(cache)),
            TableClassifier::new(classifier),
        )
    }

    /// Build a store around an existing cache.
    pub fn with_cache(pool: P, cache: Arc<QueryCache>, classifier: TableClassifier) -> Self {
        Self {
            pool,
            cache,
            classifier: Arc::new(classifier),
            sweeper_shutdown: None,
        }
    }

    /// Start the background sweep if the cache config enables one.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_sweeper(mut self) -> Self {
        if let Some(period) = self.cache.config().sweep_interval {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            spawn_sweeper(&self.cache, period, shutdown_rx);
            self.sweeper_shutdown = Some(Arc::new(shutdown_tx));
        }
        self
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn classifier(&self) -> &TableClassifier {
        &self.classifier
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ========================================================================
    // PRIMITIVES
    // ========================================================================

    /// Run a statement and return the number of rows affected.
    ///
    /// Writes invalidate the cache afterwards. Reads run uncached.
    pub async fn execute(&self, stmt: impl Into<Statement>) -> StoreResult<u64> {
        let stmt = stmt.into();
        let payload = match TableClassifier::statement_kind(&stmt.sql) {
            StatementKind::Read => self.run_uncached(stmt, PayloadShape::Executed).await?,
            _ => self.write(stmt, PayloadShape::Executed).await?,
        };
        Ok(match payload {
            CachePayload::Executed(n) => n,
            _ => 0,
        })
    }

    /// Every row of the result.
    pub async fn fetch_all(&self, stmt: impl Into<Statement>) -> StoreResult<Vec<Row>> {
        Ok(match self.fetch(stmt.into(), PayloadShape::Rows).await? {
            CachePayload::Rows(rows) => rows,
            _ => Vec::new(),
        })
    }

    /// The first row of the result, if any.
    pub async fn fetch_one(&self, stmt: impl Into<Statement>) -> StoreResult<Option<Row>> {
        Ok(match self.fetch(stmt.into(), PayloadShape::Row).await? {
            CachePayload::Row(row) if !row.is_empty() => Some(row),
            _ => None,
        })
    }

    /// First column of the first row; `Value::Null` when there is no row.
    pub async fn fetch_scalar(&self, stmt: impl Into<Statement>) -> StoreResult<Value> {
        Ok(match self.fetch(stmt.into(), PayloadShape::Scalar).await? {
            CachePayload::Scalar(value) => value,
            _ => Value::Null,
        })
    }

    async fn fetch(&self, stmt: Statement, shape: PayloadShape) -> StoreResult<CachePayload> {
        match TableClassifier::statement_kind(&stmt.sql) {
            StatementKind::Write => self.write(stmt, shape).await,
            StatementKind::Read => self.read_through(stmt, shape).await,
            StatementKind::Other => {
                tracing::warn!(
                    target: "quill::consistency",
                    sql = %stmt.sql,
                    "Statement not recognized as a read; result not cached"
                );
                self.run_uncached(stmt, shape).await
            }
        }
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    async fn read_through(&self, stmt: Statement, shape: PayloadShape) -> StoreResult<CachePayload> {
        let Statement { sql, params, hint } = stmt;
        let key = shaped_fingerprint(shape, &sql, &params);

        if let Some(payload) = self.cache.get(&key) {
            if payload.shape() == shape {
                tracing::debug!(%key, "Cache hit");
                return Ok(payload);
            }
            tracing::warn!(%key, "Cached payload shape mismatch; treating as miss");
        }

        let target = self.read_target(&sql, &params, hint.as_ref());
        let mut conn = self.pool.acquire().await?;
        let cache = Arc::clone(&self.cache);
        let classifier = Arc::clone(&self.classifier);

        let task = tokio::spawn(async move {
            let payload = run_shape(&mut conn, shape, &sql, &params).await?;
            drop(conn);

            if let Some((table, mut ids)) = target {
                ids.extend(classifier.extract_entities(&payload));
                let stored = cache.set(key, payload.clone(), &table, &ids);
                tracing::debug!(table = %table, entity_ids = ids.len(), stored, "Cache miss");
            }
            Ok(payload)
        });
        task.await?
    }

    /// Table and entity ids a read should be cached under, or `None` to skip
    /// caching.
    fn read_target(
        &self,
        sql: &str,
        params: &[Value],
        hint: Option<&CacheHint>,
    ) -> Option<(String, Vec<EntityId>)> {
        if let Some(hint) = hint {
            return Some((hint.table.clone(), hint.entity_ids.clone()));
        }

        let classification = self.classifier.classify(sql, params);
        match classification.tables.into_iter().next() {
            Some(table) => Some((table, classification.entity_ids)),
            None => {
                tracing::warn!(
                    target: "quill::consistency",
                    sql,
                    "Read source unknown or spans several tables; result not cached"
                );
                None
            }
        }
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    async fn write(&self, stmt: Statement, shape: PayloadShape) -> StoreResult<CachePayload> {
        let Statement { sql, params, hint } = stmt;
        let plan = Invalidation::plan(&self.classifier, &sql, &params, hint.as_ref());
        let mut conn = self.pool.acquire().await?;
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            let payload = run_shape(&mut conn, shape, &sql, &params).await?;
            drop(conn);

            if let Some(plan) = plan {
                plan.apply(&cache);
            }
            Ok(payload)
        });
        task.await?
    }

    async fn run_uncached(&self, stmt: Statement, shape: PayloadShape) -> StoreResult<CachePayload> {
        let Statement { sql, params, .. } = stmt;
        let mut conn = self.pool.acquire().await?;
        let task = tokio::spawn(async move { run_shape(&mut conn, shape, &sql, &params).await });
        task.await?
    }

    // ========================================================================
    // ADMINISTRATION
    // ========================================================================

    /// Drop every cached result that depends on `table`.
    pub fn invalidate_table(&self, table: &str) -> usize {
        self.cache.invalidate_table(table)
    }

    /// Drop every cached result registered under `id`.
    pub fn invalidate_entity(&self, id: impl Into<EntityId>) -> usize {
        self.cache.invalidate_entity(&id.into())
    }

    /// Drop cached results registered under both `table` and `id`.
    pub fn invalidate_intersection(&self, table: &str, id: impl Into<EntityId>) -> usize {
        self.cache.invalidate_intersection(table, &id.into())
    }

    pub fn flush(&self) -> usize {
        self.cache.flush()
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    /// A transaction scope that has not begun yet.
    pub fn transaction(&self) -> TransactionScope<P> {
        TransactionScope::new(
            self.pool.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.classifier),
        )
    }

    /// A transaction scope with `BEGIN` already issued.
    pub async fn begin(&self) -> StoreResult<TransactionScope<P>> {
        let mut scope = self.transaction();
        scope.begin().await?;
        Ok(scope)
    }
}

impl Store<PgPool> {
    /// Build the PostgreSQL pool, open `min_size` connections, apply the
    /// schema and start the cache sweeper.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let pool = config.db.create_pool()?;

        let mut warm = Vec::with_capacity(config.db.min_size);
        for _ in 0..config.db.min_size {
            warm.push(pool.acquire().await?);
        }
        drop(warm);

        let store = Self::new(pool, config.cache, config.classifier).with_sweeper();
        crate::schema::bootstrap(&store).await?;

        tracing::info!(status = ?store.pool_status(), "Store connected");
        Ok(store)
    }
}

/// Run `sql` on `conn` with the primitive matching `shape`.
pub(crate) async fn run_shape<C: Connection>(
    conn: &mut C,
    shape: PayloadShape,
    sql: &str,
    params: &[Value],
) -> StoreResult<CachePayload> {
    Ok(match shape {
        PayloadShape::Row => CachePayload::Row(conn.query_opt(sql, params).await?.unwrap_or_default()),
        PayloadShape::Rows => CachePayload::Rows(conn.query(sql, params).await?),
        PayloadShape::Scalar => CachePayload::Scalar(conn.query_scalar(sql, params).await?),
        PayloadShape::Executed => CachePayload::Executed(conn.execute(sql, params).await?),
    })
}
