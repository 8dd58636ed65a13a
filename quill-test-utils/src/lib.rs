//! Quill Test Utilities
//!
//! Shared test infrastructure for the Quill crates:
//!
//! - [`MockPool`]: a scripted, bounded connection pool implementing the
//!   `quill-db` pool seam, with a call log for asserting what reached the
//!   "database"
//! - [`generators`]: proptest strategies for values, rows and entity ids
//! - [`fixtures`]: pre-built rows and stores for common scenarios

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// Re-export core types for convenience
pub use quill_core::{CachePayload, EntityId, Row, Value};
pub use quill_db::{Connection, ConnectionPool, PoolStatus, StoreError, StoreResult};

// ============================================================================
// MOCK POOL
// ============================================================================

/// What a mock connection answers for one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Rows(Vec<Row>),
    Affected(u64),
    Error { message: String, code: Option<String> },
}

impl MockReply {
    pub fn row(row: Row) -> Self {
        MockReply::Rows(vec![row])
    }

    pub fn empty() -> Self {
        MockReply::Rows(Vec::new())
    }

    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        MockReply::Error {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    fn into_error(message: String, code: Option<String>) -> StoreError {
        StoreError::Statement {
            message,
            code,
            constraint: None,
        }
    }
}

/// One operation recorded by a mock connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query { sql: String, params: Vec<Value> },
    Execute { sql: String, params: Vec<Value> },
    Batch(String),
    Discard,
}

type Handler = Arc<dyn Fn(&[Value]) -> MockReply + Send + Sync>;

#[derive(Default)]
struct MockState {
    handlers: Mutex<HashMap<String, Handler>>,
    failing_batches: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    latency: Mutex<Option<Duration>>,
    waiting: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockState {
    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    fn reply(&self, sql: &str, params: &[Value]) -> StoreResult<MockReply> {
        let handler = lock(&self.handlers).get(sql).cloned();
        match handler {
            Some(handler) => Ok(handler(params)),
            None => Err(StoreError::statement(format!(
                "no mock reply registered for: {sql}"
            ))),
        }
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Scripted connection pool.
///
/// Replies are registered per exact SQL text. Statements nobody registered
/// fail with `StoreError::Statement`; batch commands (`BEGIN`, `COMMIT`,
/// DDL) succeed unless marked with [`MockPool::fail_batch`]. At most
/// `max_size` connections are out at once; further `acquire` calls wait.
#[derive(Clone)]
pub struct MockPool {
    state: Arc<MockState>,
    permits: Arc<Semaphore>,
    max_size: usize,
}

impl MockPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Arc::new(MockState::default()),
            permits: Arc::new(Semaphore::new(max_size)),
            max_size,
        }
    }

    /// Answer `sql` by calling `handler` with the bound parameters.
    pub fn on<F>(&self, sql: &str, handler: F) -> &Self
    where
        F: Fn(&[Value]) -> MockReply + Send + Sync + 'static,
    {
        lock(&self.state.handlers).insert(sql.to_string(), Arc::new(handler));
        self
    }

    /// Answer `sql` with fixed rows.
    pub fn on_rows(&self, sql: &str, rows: Vec<Row>) -> &Self {
        self.on(sql, move |_| MockReply::Rows(rows.clone()))
    }

    /// Answer `sql` with a fixed affected-row count.
    pub fn on_affected(&self, sql: &str, affected: u64) -> &Self {
        self.on(sql, move |_| MockReply::Affected(affected))
    }

    /// Reject `sql` with a backend error.
    pub fn on_error(&self, sql: &str, message: &str, code: Option<&str>) -> &Self {
        let reply = MockReply::error(message, code);
        self.on(sql, move |_| reply.clone())
    }

    /// Make a batch command such as `COMMIT` fail.
    pub fn fail_batch(&self, command: &str) -> &Self {
        lock(&self.state.failing_batches).insert(command.to_string());
        self
    }

    /// Delay every statement by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.state.latency) = Some(latency);
        self
    }

    // === Inspection ===

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state.calls).clone()
    }

    /// How many times `sql` reached a connection.
    pub fn query_count(&self, sql: &str) -> usize {
        lock(&self.state.calls)
            .iter()
            .filter(|call| match call {
                Call::Query { sql: s, .. } | Call::Execute { sql: s, .. } => s == sql,
                _ => false,
            })
            .count()
    }

    /// Batch commands in the order they were sent.
    pub fn batch_log(&self) -> Vec<String> {
        lock(&self.state.calls)
            .iter()
            .filter_map(|call| match call {
                Call::Batch(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Connections closed instead of returned.
    pub fn discarded(&self) -> usize {
        lock(&self.state.calls)
            .iter()
            .filter(|call| matches!(call, Call::Discard))
            .count()
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn clear_calls(&self) {
        lock(&self.state.calls).clear();
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    async fn acquire(&self) -> StoreResult<MockConnection> {
        self.state.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = Arc::clone(&self.permits).acquire_owned().await;
        self.state.waiting.fetch_sub(1, Ordering::SeqCst);

        let permit = permit.map_err(|_| StoreError::connection("mock pool closed"))?;
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            _permit: permit,
        })
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            max_size: self.max_size,
            size: self.max_size,
            available: self.permits.available_permits(),
            waiting: self.state.waiting.load(Ordering::SeqCst),
        }
    }
}

/// Connection handed out by [`MockPool`]. Returns its slot when dropped.
pub struct MockConnection {
    state: Arc<MockState>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        self.state.record(Call::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.state.delay().await;
        match self.state.reply(sql, params)? {
            MockReply::Rows(rows) => Ok(rows.len() as u64),
            MockReply::Affected(n) => Ok(n),
            MockReply::Error { message, code } => Err(MockReply::into_error(message, code)),
        }
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        self.state.record(Call::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        self.state.delay().await;
        match self.state.reply(sql, params)? {
            MockReply::Rows(rows) => Ok(rows),
            MockReply::Affected(_) => Ok(Vec::new()),
            MockReply::Error { message, code } => Err(MockReply::into_error(message, code)),
        }
    }

    async fn batch_execute(&mut self, sql: &str) -> StoreResult<()> {
        self.state.record(Call::Batch(sql.to_string()));
        if lock(&self.state.failing_batches).contains(sql) {
            return Err(StoreError::connection(format!("{sql} failed: connection reset")));
        }
        Ok(())
    }

    fn discard(self) {
        self.state.record(Call::Discard);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Quill value types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Discord-style snowflake.
    pub fn arb_snowflake() -> impl Strategy<Value = i64> {
        100_000_000_000_000_000i64..999_999_999_999_999_999i64
    }

    /// Generate a value of a type that compares reliably (no floats).
    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-zA-Z0-9 ']{0,16}".prop_map(Value::Text),
        ]
    }

    /// Generate a row of up to six columns.
    pub fn arb_row() -> impl Strategy<Value = Row> {
        prop::collection::vec(("[a-z_]{1,8}", arb_value()), 0..6)
            .prop_map(|columns| columns.into_iter().collect())
    }

    /// Generate a plain or composite entity id.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        prop_oneof![
            arb_snowflake().prop_map(EntityId::from),
            (arb_snowflake(), arb_snowflake())
                .prop_map(|(a, b)| EntityId::composite([a.to_string(), b.to_string()])),
        ]
    }

    /// Generate one of the bot's table names.
    pub fn arb_table() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec!["guilds", "users", "prefixes", "tags", "afk"])
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built rows and stores for common testing scenarios.

    use super::*;
    use chrono::Utc;
    use quill_cache::{CacheConfig, ClassifierConfig, ManualClock, QueryCache, TableClassifier};
    use quill_db::Store;

    /// A `users` row.
    pub fn user_row(id: i64, username: &str) -> Row {
        Row::new()
            .with("id", id)
            .with("username", username)
            .with("discriminator", Value::Null)
            .with("first_seen", Utc::now())
            .with("last_active", Utc::now())
    }

    /// A `guilds` row.
    pub fn guild_row(id: i64, name: &str) -> Row {
        Row::new()
            .with("id", id)
            .with("name", name)
            .with("joined_at", Utc::now())
            .with("last_active", Utc::now())
    }

    /// A `tags` row with no uses.
    pub fn tag_row(id: i64, guild_id: i64, user_id: i64, name: &str, content: &str) -> Row {
        Row::new()
            .with("id", id)
            .with("guild_id", guild_id)
            .with("user_id", user_id)
            .with("name", name)
            .with("content", content)
            .with("uses", 0i64)
            .with("created_at", Utc::now())
    }

    /// An `afk` row.
    pub fn afk_row(user_id: i64, guild_id: i64, message: &str) -> Row {
        Row::new()
            .with("user_id", user_id)
            .with("guild_id", guild_id)
            .with("message", message)
            .with("created_at", Utc::now())
    }

    /// Single-column row, as returned by scalar queries.
    pub fn scalar_row(column: &str, value: impl Into<Value>) -> Row {
        Row::new().with(column, value)
    }

    /// Store over `pool` with default cache and classifier settings.
    pub fn mock_store(pool: &MockPool) -> Store<MockPool> {
        Store::new(
            pool.clone(),
            CacheConfig::default(),
            ClassifierConfig::default(),
        )
    }

    /// Store whose cache expires entries by a clock the test controls.
    pub fn mock_store_with_clock(
        pool: &MockPool,
        config: CacheConfig,
    ) -> (Store<MockPool>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(QueryCache::with_clock(config, clock.clone()));
        let store = Store::with_cache(
            pool.clone(),
            cache,
            TableClassifier::new(ClassifierConfig::default()),
        );
        (store, clock)
    }
}
