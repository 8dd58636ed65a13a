//! Custom command prefixes, per guild or per user.

use std::fmt;

use quill_cache::CacheHint;
use quill_core::{EntityId, Value};

use super::BotDb;
use crate::error::StoreResult;
use crate::pool::ConnectionPool;
use crate::statement::Statement;

/// Who a custom prefix belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefixScope {
    Guild,
    User,
}

impl PrefixScope {
    /// Value stored in `prefixes.entity_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefixScope::Guild => "guild",
            PrefixScope::User => "user",
        }
    }

    /// Entity id under which the prefix of `owner_id` is cached.
    pub fn entity(&self, owner_id: i64) -> EntityId {
        EntityId::composite([self.as_str().to_string(), owner_id.to_string()])
    }

    fn hint(&self, owner_id: i64) -> CacheHint {
        CacheHint::table("prefixes").entity(self.entity(owner_id))
    }
}

impl fmt::Display for PrefixScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<P: ConnectionPool> BotDb<P> {
    pub async fn get_prefix(&self, scope: PrefixScope, owner_id: i64) -> StoreResult<Option<String>> {
        let value = self
            .store
            .fetch_scalar(
                Statement::new(
                    "SELECT prefix FROM prefixes WHERE entity_type = $1 AND entity_id = $2",
                )
                .bind(scope.as_str())
                .bind(owner_id)
                .hint(scope.hint(owner_id)),
            )
            .await?;
        Ok(match value {
            Value::Text(prefix) => Some(prefix),
            _ => None,
        })
    }

    pub async fn set_prefix(&self, scope: PrefixScope, owner_id: i64, prefix: &str) -> StoreResult<()> {
        self.store
            .execute(
                Statement::new(
                    "INSERT INTO prefixes (entity_type, entity_id, prefix) VALUES ($1, $2, $3) \
                     ON CONFLICT (entity_type, entity_id) DO UPDATE \
                     SET prefix = $3, created_at = NOW()",
                )
                .bind(scope.as_str())
                .bind(owner_id)
                .bind(prefix)
                .hint(scope.hint(owner_id).by_intersection()),
            )
            .await?;
        Ok(())
    }

    /// Remove a custom prefix. Returns whether one existed.
    pub async fn remove_prefix(&self, scope: PrefixScope, owner_id: i64) -> StoreResult<bool> {
        let removed = self
            .store
            .fetch_scalar(
                Statement::new(
                    "DELETE FROM prefixes WHERE entity_type = $1 AND entity_id = $2 RETURNING id",
                )
                .bind(scope.as_str())
                .bind(owner_id)
                .hint(scope.hint(owner_id).by_intersection()),
            )
            .await?;
        Ok(!removed.is_null())
    }
}
