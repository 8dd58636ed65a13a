//! Integration tests for the cached store facade.
//!
//! Tests verify:
//! - Reads are served from the cache after the first miss
//! - Writes invalidate the tables or entities they touch, and only those
//! - Empty, unknown-source and multi-table reads are never cached
//! - Connections are released and caches populated even when the caller
//!   gives up on the future

use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use quill_db::{CacheConfig, CacheHint, Statement, StoreError, Value};
use quill_test_utils::fixtures::{guild_row, mock_store, mock_store_with_clock, scalar_row, tag_row, user_row};
use quill_test_utils::generators::{arb_row, arb_table};
use quill_test_utils::{MockPool, MockReply};

// ============================================================================
// TEST FIXTURES
// ============================================================================

const USER_BY_ID: &str = "SELECT * FROM users WHERE id = $1";
const RENAME_USER: &str = "UPDATE users SET username = $2 WHERE id = $1";
const GUILD_BY_ID: &str = "SELECT * FROM guilds WHERE id = $1";
const RENAME_GUILD: &str = "UPDATE guilds SET name = $2 WHERE id = $1";
const TAGS_BY_GUILD: &str = "SELECT * FROM tags WHERE guild_id = $1";
const DELETE_TAG: &str = "DELETE FROM tags WHERE id = $1";
const PREFIX_LOOKUP: &str = "SELECT prefix FROM prefixes WHERE entity_type = $1 AND entity_id = $2";
const PREFIX_DELETE: &str =
    "DELETE FROM prefixes WHERE entity_type = $1 AND entity_id = $2 RETURNING id";

/// A users table holding one row whose name can be changed by RENAME_USER.
fn user_table(pool: &MockPool, initial: &str) {
    let name = Arc::new(Mutex::new(initial.to_string()));
    let read = Arc::clone(&name);
    pool.on(USER_BY_ID, move |params| {
        let id = params[0].as_i64().unwrap_or_default();
        MockReply::row(user_row(id, &read.lock().unwrap()))
    });
    pool.on(RENAME_USER, move |params| {
        *name.lock().unwrap() = params[1].as_str().unwrap_or_default().to_string();
        MockReply::Affected(1)
    });
}

fn user_by_id(id: i64) -> Statement {
    Statement::new(USER_BY_ID).bind(id)
}

fn username(row: &Option<quill_db::Row>) -> String {
    row.as_ref()
        .and_then(|r| r.try_get::<String>("username").ok())
        .unwrap_or_default()
}

// ============================================================================
// READ PATH
// ============================================================================

#[tokio::test]
async fn test_repeated_read_is_served_from_cache() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    let first = store.fetch_one(user_by_id(1)).await.unwrap();
    let second = store.fetch_one(user_by_id(1)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(username(&first), "alice");
    assert_eq!(pool.query_count(USER_BY_ID), 1);

    let stats = store.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entry_count, 1);
}

#[tokio::test]
async fn test_different_parameters_are_different_entries() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    store.fetch_one(user_by_id(1)).await.unwrap();
    store.fetch_one(user_by_id(2)).await.unwrap();
    store.fetch_one(user_by_id(2)).await.unwrap();

    assert_eq!(pool.query_count(USER_BY_ID), 2);
    assert_eq!(store.cache().len(), 2);
}

#[tokio::test]
async fn test_result_shapes_are_cached_separately() {
    let pool = MockPool::new(4);
    pool.on_rows(TAGS_BY_GUILD, vec![tag_row(5, 1, 10, "faq", "read the faq")]);
    let store = mock_store(&pool);

    let all = store.fetch_all(Statement::new(TAGS_BY_GUILD).bind(1i64)).await.unwrap();
    let one = store.fetch_one(Statement::new(TAGS_BY_GUILD).bind(1i64)).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(one.as_ref(), all.first());
    assert_eq!(pool.query_count(TAGS_BY_GUILD), 2);

    store.fetch_all(Statement::new(TAGS_BY_GUILD).bind(1i64)).await.unwrap();
    store.fetch_one(Statement::new(TAGS_BY_GUILD).bind(1i64)).await.unwrap();
    assert_eq!(pool.query_count(TAGS_BY_GUILD), 2);
}

#[tokio::test]
async fn test_empty_results_are_not_cached() {
    let pool = MockPool::new(4);
    pool.on_rows(TAGS_BY_GUILD, vec![]);
    pool.on_rows(USER_BY_ID, vec![]);
    let store = mock_store(&pool);

    for _ in 0..2 {
        let rows = store.fetch_all(Statement::new(TAGS_BY_GUILD).bind(1i64)).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.fetch_one(user_by_id(1)).await.unwrap(), None);
        assert_eq!(store.fetch_scalar(user_by_id(1)).await.unwrap(), Value::Null);
    }

    assert_eq!(pool.query_count(TAGS_BY_GUILD), 2);
    assert_eq!(pool.query_count(USER_BY_ID), 4);
    assert!(store.cache().is_empty());
}

#[tokio::test]
async fn test_reads_without_single_known_table_are_not_cached() {
    let join = "SELECT * FROM tags JOIN users ON users.id = tags.user_id";
    let unknown = "SELECT * FROM reminders WHERE id = $1";
    let constant = "SELECT 1";

    let pool = MockPool::new(4);
    pool.on_rows(join, vec![tag_row(5, 1, 10, "faq", "x")]);
    pool.on_rows(unknown, vec![scalar_row("id", 3i64)]);
    pool.on_rows(constant, vec![scalar_row("?column?", 1i64)]);
    let store = mock_store(&pool);

    for _ in 0..2 {
        store.fetch_all(join).await.unwrap();
        store.fetch_one(Statement::new(unknown).bind(3i64)).await.unwrap();
        assert_eq!(store.fetch_scalar(constant).await.unwrap(), Value::Int(1));
    }

    assert_eq!(pool.query_count(join), 2);
    assert_eq!(pool.query_count(unknown), 2);
    assert_eq!(pool.query_count(constant), 2);
    assert!(store.cache().is_empty());
}

#[tokio::test]
async fn test_execute_of_a_read_runs_uncached() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    assert_eq!(store.execute(user_by_id(1)).await.unwrap(), 1);
    assert_eq!(store.execute(user_by_id(1)).await.unwrap(), 1);

    assert_eq!(pool.query_count(USER_BY_ID), 2);
    assert!(store.cache().is_empty());
}

#[tokio::test]
async fn test_entries_expire_after_ttl() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    let config = CacheConfig::default().with_ttl(Duration::from_secs(10));
    let (store, clock) = mock_store_with_clock(&pool, config);

    store.fetch_one(user_by_id(1)).await.unwrap();
    clock.advance(Duration::from_secs(9));
    store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(pool.query_count(USER_BY_ID), 1);

    clock.advance(Duration::from_secs(2));
    store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(pool.query_count(USER_BY_ID), 2);
    assert_eq!(store.cache_stats().expirations, 1);
}

#[tokio::test]
async fn test_backend_error_is_returned_and_not_cached() {
    let pool = MockPool::new(4);
    pool.on_error(TAGS_BY_GUILD, "relation \"tags\" does not exist", Some("42P01"));
    let store = mock_store(&pool);

    let err = store
        .fetch_all(Statement::new(TAGS_BY_GUILD).bind(1i64))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Statement { .. }));
    assert_eq!(err.code(), Some("42P01"));
    assert!(store.cache().is_empty());
    assert_eq!(pool.available(), 4);
}

// ============================================================================
// WRITE PATH
// ============================================================================

#[tokio::test]
async fn test_write_makes_next_read_see_new_value() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    let before = store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(username(&before), "alice");

    let affected = store
        .execute(Statement::new(RENAME_USER).bind(1i64).bind("bob"))
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let after = store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(username(&after), "bob");
    assert_eq!(pool.query_count(USER_BY_ID), 2);
}

#[tokio::test]
async fn test_comma_join_read_sees_write_to_second_table() {
    const COMMA_JOIN: &str =
        "SELECT u.id, t.name FROM users u, tags t WHERE t.user_id = u.id AND u.id = $1";
    const RENAME_TAG: &str = "UPDATE tags SET name = $2 WHERE id = $1";

    let pool = MockPool::new(4);
    let name = Arc::new(Mutex::new("old".to_string()));
    let read = Arc::clone(&name);
    pool.on(COMMA_JOIN, move |_| {
        MockReply::row(scalar_row("name", read.lock().unwrap().as_str()))
    });
    pool.on(RENAME_TAG, move |params| {
        *name.lock().unwrap() = params[1].as_str().unwrap_or_default().to_string();
        MockReply::Affected(1)
    });
    let store = mock_store(&pool);

    let first = store.fetch_scalar(Statement::new(COMMA_JOIN).bind(1i64)).await.unwrap();
    assert_eq!(first, Value::from("old"));
    assert!(store.cache().is_empty());

    store
        .execute(Statement::new(RENAME_TAG).bind(5i64).bind("new"))
        .await
        .unwrap();
    let second = store.fetch_scalar(Statement::new(COMMA_JOIN).bind(1i64)).await.unwrap();

    assert_eq!(second, Value::from("new"));
    assert_eq!(pool.query_count(COMMA_JOIN), 2);
}

#[tokio::test]
async fn test_write_invalidates_only_its_table() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    pool.on_rows(TAGS_BY_GUILD, vec![tag_row(5, 1, 10, "faq", "x")]);
    pool.on_affected(DELETE_TAG, 1);
    let store = mock_store(&pool);

    store.fetch_one(user_by_id(1)).await.unwrap();
    store.fetch_all(Statement::new(TAGS_BY_GUILD).bind(1i64)).await.unwrap();

    store.execute(Statement::new(DELETE_TAG).bind(5i64)).await.unwrap();

    store.fetch_one(user_by_id(1)).await.unwrap();
    store.fetch_all(Statement::new(TAGS_BY_GUILD).bind(1i64)).await.unwrap();
    assert_eq!(pool.query_count(USER_BY_ID), 1);
    assert_eq!(pool.query_count(TAGS_BY_GUILD), 2);
}

#[tokio::test]
async fn test_hinted_write_invalidates_intersection_only() {
    let pool = MockPool::new(4);
    pool.on(GUILD_BY_ID, |params| {
        MockReply::row(guild_row(params[0].as_i64().unwrap_or_default(), "guild"))
    });
    pool.on_affected(RENAME_GUILD, 1);
    let store = mock_store(&pool);

    store.fetch_one(Statement::new(GUILD_BY_ID).bind(1i64)).await.unwrap();
    store.fetch_one(Statement::new(GUILD_BY_ID).bind(2i64)).await.unwrap();

    store
        .execute(
            Statement::new(RENAME_GUILD)
                .bind(1i64)
                .bind("renamed")
                .hint(CacheHint::table("guilds").entity(1i64).by_intersection()),
        )
        .await
        .unwrap();

    store.fetch_one(Statement::new(GUILD_BY_ID).bind(1i64)).await.unwrap();
    store.fetch_one(Statement::new(GUILD_BY_ID).bind(2i64)).await.unwrap();
    assert_eq!(pool.query_count(GUILD_BY_ID), 3);
}

#[tokio::test]
async fn test_write_through_fetch_scalar_invalidates() {
    let pool = MockPool::new(4);
    pool.on_rows(PREFIX_LOOKUP, vec![scalar_row("prefix", "!")]);
    pool.on_rows(PREFIX_DELETE, vec![scalar_row("id", 7i64)]);
    let store = mock_store(&pool);

    let lookup = || Statement::new(PREFIX_LOOKUP).bind("guild").bind(42i64);
    assert_eq!(store.fetch_scalar(lookup()).await.unwrap(), Value::from("!"));

    let removed = store
        .fetch_scalar(Statement::new(PREFIX_DELETE).bind("guild").bind(42i64))
        .await
        .unwrap();
    assert_eq!(removed, Value::Int(7));

    store.fetch_scalar(lookup()).await.unwrap();
    assert_eq!(pool.query_count(PREFIX_LOOKUP), 2);
}

#[tokio::test]
async fn test_failed_write_leaves_cache_untouched() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    pool.on_error(
        "UPDATE users SET username = $2 WHERE username = $3",
        "duplicate key value violates unique constraint",
        Some("23505"),
    );
    let store = mock_store(&pool);

    store.fetch_one(user_by_id(1)).await.unwrap();
    let err = store
        .execute(
            Statement::new("UPDATE users SET username = $2 WHERE username = $3")
                .bind(1i64)
                .bind("bob")
                .bind("alice"),
        )
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());

    store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(pool.query_count(USER_BY_ID), 1);
}

#[tokio::test]
async fn test_write_with_unknown_target_still_runs() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    pool.on_affected("INSERT INTO reminders (user_id) VALUES ($1)", 1);
    let store = mock_store(&pool);

    store.fetch_one(user_by_id(1)).await.unwrap();
    let affected = store
        .execute(Statement::new("INSERT INTO reminders (user_id) VALUES ($1)").bind(1i64))
        .await
        .unwrap();
    assert_eq!(affected, 1);
    // Unknown tables are never cached, so nothing can go stale.
    assert_eq!(store.cache().len(), 1);
}

// ============================================================================
// ADMINISTRATION
// ============================================================================

#[tokio::test]
async fn test_manual_invalidation() {
    let pool = MockPool::new(4);
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    store.fetch_one(user_by_id(1)).await.unwrap();
    store.fetch_one(user_by_id(2)).await.unwrap();
    assert_eq!(store.invalidate_entity(1i64), 1);
    assert_eq!(store.invalidate_intersection("guilds", 2i64), 0);
    assert_eq!(store.invalidate_intersection("users", 2i64), 1);

    store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(store.invalidate_table("users"), 1);

    store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(store.flush(), 1);
    assert!(store.cache().is_empty());
}

#[tokio::test]
async fn test_schema_bootstrap_runs_ddl_and_flushes() {
    let pool = MockPool::new(1);
    user_table(&pool, "alice");
    let store = mock_store(&pool);
    store.fetch_one(user_by_id(1)).await.unwrap();

    quill_db::bootstrap(&store).await.unwrap();

    assert_eq!(pool.batch_log(), vec![quill_db::schema::SCHEMA_SQL.to_string()]);
    assert!(store.cache().is_empty());
    assert_eq!(pool.available(), 1);
}

// ============================================================================
// POOL AND CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_saturated_pool_makes_callers_wait() {
    let pool = MockPool::new(1);
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    let mut tx = store.begin().await.unwrap();
    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.fetch_one(user_by_id(1)).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.pool_status().waiting, 1);
    assert!(!waiter.is_finished());

    tx.commit().await.unwrap();
    let row = waiter.await.unwrap().unwrap();
    assert_eq!(username(&row), "alice");
    assert_eq!(store.pool_status().waiting, 0);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn test_abandoned_read_still_populates_and_releases() {
    let pool = MockPool::new(2).with_latency(Duration::from_millis(50));
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), store.fetch_one(user_by_id(1))).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.available(), 2);
    assert_eq!(store.cache().len(), 1);

    store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(pool.query_count(USER_BY_ID), 1);
}

#[tokio::test]
async fn test_abandoned_write_still_invalidates() {
    let pool = MockPool::new(2).with_latency(Duration::from_millis(50));
    user_table(&pool, "alice");
    let store = mock_store(&pool);

    store.fetch_one(user_by_id(1)).await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        store.execute(Statement::new(RENAME_USER).bind(1i64).bind("bob")),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.cache().is_empty());

    let row = store.fetch_one(user_by_id(1)).await.unwrap();
    assert_eq!(username(&row), "bob");
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any cached non-empty read is dropped by invalidating its table.
    #[test]
    fn prop_table_invalidation_drops_cached_reads(
        rows in prop::collection::vec(arb_row(), 1..4),
        table in arb_table(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let sql = format!("SELECT * FROM {table}");

        runtime.block_on(async {
            let pool = MockPool::new(1);
            pool.on_rows(&sql, rows.clone());
            let store = mock_store(&pool);

            let fetched = store.fetch_all(sql.as_str()).await.unwrap();
            prop_assert_eq!(&fetched, &rows);
            prop_assert_eq!(store.cache().len(), 1);

            prop_assert_eq!(store.invalidate_table(table), 1);
            prop_assert!(store.cache().is_empty());
            prop_assert!(store.cache().verify_indices());
            Ok(())
        })?;
    }
}
