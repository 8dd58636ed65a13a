//! Transaction Scope
//!
//! A scope pins one pooled connection for the lifetime of a transaction and
//! runs every statement on it, bypassing the cache entirely: nothing is read
//! from the cache (a transaction must see its own uncommitted writes) and
//! nothing is written to it (uncommitted rows must never be shared).
//!
//! Writes are not invalidated as they run. Their invalidations are recorded
//! and applied after `COMMIT`, so no other task can repopulate the cache
//! from pre-commit state in between.
//!
//! # States
//!
//! ```text
//! Idle --begin--> Active --commit/rollback/statement error--> Closed
//! ```
//!
//! Every operation on a scope that is not Active fails with
//! `StoreError::Usage`.

use std::sync::Arc;

use quill_cache::{QueryCache, StatementKind, TableClassifier};
use quill_core::{CachePayload, PayloadShape, Row, Value};

use crate::error::{StoreError, StoreResult};
use crate::invalidation::Invalidation;
use crate::pool::{Connection, ConnectionPool};
use crate::statement::Statement;
use crate::store::run_shape;

enum ScopeState<C> {
    Idle,
    Active(C),
    Closed,
}

/// A database transaction on a dedicated connection.
///
/// Obtained from `Store::transaction` (Idle) or `Store::begin` (Active).
/// Dropping an Active scope closes its connection instead of returning it to
/// the pool with a transaction still open.
pub struct TransactionScope<P: ConnectionPool> {
    pool: P,
    cache: Arc<QueryCache>,
    classifier: Arc<TableClassifier>,
    state: ScopeState<P::Connection>,
    pending: Vec<Invalidation>,
}

impl<P: ConnectionPool> TransactionScope<P> {
    pub(crate) fn new(pool: P, cache: Arc<QueryCache>, classifier: Arc<TableClassifier>) -> Self {
        Self {
            pool,
            cache,
            classifier,
            state: ScopeState::Idle,
            pending: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ScopeState::Active(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ScopeState::Closed)
    }

    /// Acquire a dedicated connection and issue `BEGIN`.
    pub async fn begin(&mut self) -> StoreResult<()> {
        match self.state {
            ScopeState::Idle => {}
            ScopeState::Active(_) => return Err(StoreError::usage("transaction already begun")),
            ScopeState::Closed => return Err(StoreError::usage("transaction is closed")),
        }

        let conn = self.pool.acquire().await?;
        // Held in the scope before BEGIN is sent, so a cancelled begin still
        // ends up discarded by Drop.
        self.state = ScopeState::Active(conn);

        let result = match &mut self.state {
            ScopeState::Active(conn) => conn.batch_execute("BEGIN").await,
            _ => Ok(()),
        };
        if let Err(err) = result {
            if let ScopeState::Active(conn) = std::mem::replace(&mut self.state, ScopeState::Closed) {
                conn.discard();
            }
            return Err(err);
        }

        tracing::debug!("Transaction begun");
        Ok(())
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    pub async fn execute(&mut self, stmt: impl Into<Statement>) -> StoreResult<u64> {
        Ok(match self.run(stmt.into(), PayloadShape::Executed).await? {
            CachePayload::Executed(n) => n,
            _ => 0,
        })
    }

    pub async fn fetch_all(&mut self, stmt: impl Into<Statement>) -> StoreResult<Vec<Row>> {
        Ok(match self.run(stmt.into(), PayloadShape::Rows).await? {
            CachePayload::Rows(rows) => rows,
            _ => Vec::new(),
        })
    }

    pub async fn fetch_one(&mut self, stmt: impl Into<Statement>) -> StoreResult<Option<Row>> {
        Ok(match self.run(stmt.into(), PayloadShape::Row).await? {
            CachePayload::Row(row) if !row.is_empty() => Some(row),
            _ => None,
        })
    }

    pub async fn fetch_scalar(&mut self, stmt: impl Into<Statement>) -> StoreResult<Value> {
        Ok(match self.run(stmt.into(), PayloadShape::Scalar).await? {
            CachePayload::Scalar(value) => value,
            _ => Value::Null,
        })
    }

    async fn run(&mut self, stmt: Statement, shape: PayloadShape) -> StoreResult<CachePayload> {
        self.ensure_active()?;

        let Statement { sql, params, hint } = stmt;
        match TableClassifier::statement_kind(&sql) {
            StatementKind::Write => {
                // Recorded before running, so the invalidation survives a
                // caller that abandons the statement future and commits later.
                if let Some(plan) =
                    Invalidation::plan(&self.classifier, &sql, &params, hint.as_ref())
                {
                    self.pending.push(plan);
                }
            }
            StatementKind::Other => {
                tracing::warn!(
                    target: "quill::consistency",
                    sql = %sql,
                    "Statement not recognized inside transaction; nothing recorded for invalidation"
                );
            }
            StatementKind::Read => {}
        }

        let result = match &mut self.state {
            ScopeState::Active(conn) => run_shape(conn, shape, &sql, &params).await,
            _ => Err(StoreError::usage("transaction is not active")),
        };

        if let Err(err) = &result {
            tracing::debug!(error = %err, "Statement failed inside transaction; rolling back");
            self.abort().await;
        }
        result
    }

    // ========================================================================
    // COMPLETION
    // ========================================================================

    /// Issue `COMMIT`, apply recorded invalidations and release the
    /// connection.
    ///
    /// Invalidations are applied even if `COMMIT` itself fails: the outcome
    /// is then unknown, and dropping possibly-stale entries is always safe.
    pub async fn commit(&mut self) -> StoreResult<()> {
        let conn = self.take_active()?;
        let pending = std::mem::take(&mut self.pending);
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            let result = finish(conn, "COMMIT").await;
            let removed: usize = pending.iter().map(|plan| plan.apply(&cache)).sum();
            tracing::debug!(
                committed = result.is_ok(),
                invalidations = pending.len(),
                removed,
                "Transaction committed"
            );
            result
        });
        task.await?
    }

    /// Issue `ROLLBACK` and release the connection. Nothing is invalidated.
    pub async fn rollback(&mut self) -> StoreResult<()> {
        let conn = self.take_active()?;
        self.pending.clear();

        let task = tokio::spawn(finish(conn, "ROLLBACK"));
        task.await??;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }

    /// Roll back after a failed statement. Failures are logged and never
    /// replace the statement's own error.
    async fn abort(&mut self) {
        self.pending.clear();
        let ScopeState::Active(conn) = std::mem::replace(&mut self.state, ScopeState::Closed) else {
            return;
        };
        match tokio::spawn(finish(conn, "ROLLBACK")).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "Automatic rollback failed"),
            Err(err) => tracing::error!(error = %err, "Automatic rollback task failed"),
        }
    }

    fn ensure_active(&self) -> StoreResult<()> {
        match self.state {
            ScopeState::Active(_) => Ok(()),
            ScopeState::Idle => Err(StoreError::usage("transaction has not begun")),
            ScopeState::Closed => Err(StoreError::usage("transaction is closed")),
        }
    }

    fn take_active(&mut self) -> StoreResult<P::Connection> {
        self.ensure_active()?;
        match std::mem::replace(&mut self.state, ScopeState::Closed) {
            ScopeState::Active(conn) => Ok(conn),
            _ => Err(StoreError::usage("transaction is not active")),
        }
    }
}

impl<P: ConnectionPool> Drop for TransactionScope<P> {
    fn drop(&mut self) {
        if let ScopeState::Active(conn) = std::mem::replace(&mut self.state, ScopeState::Closed) {
            tracing::warn!(
                pending_invalidations = self.pending.len(),
                "Transaction scope dropped while active; discarding connection"
            );
            conn.discard();
        }
    }
}

/// Send `command`, then release the connection, or close it if the command
/// failed and its state is unknown.
async fn finish<C: Connection>(mut conn: C, command: &'static str) -> StoreResult<()> {
    match conn.batch_execute(command).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::error!(command, error = %err, "Transaction close failed; discarding connection");
            conn.discard();
            Err(err)
        }
    }
}
