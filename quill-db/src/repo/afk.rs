//! AFK statuses.

use quill_cache::CacheHint;
use quill_core::EntityId;

use super::records::Afk;
use super::{decode_all, decode_one, BotDb};
use crate::error::StoreResult;
use crate::pool::ConnectionPool;
use crate::statement::Statement;

fn member(user_id: i64, guild_id: i64) -> EntityId {
    EntityId::composite([user_id.to_string(), guild_id.to_string()])
}

/// Both the member's own entry and the guild-wide list.
fn afk_write_hint(user_id: i64, guild_id: i64) -> CacheHint {
    CacheHint::table("afk")
        .entity(member(user_id, guild_id))
        .entity(guild_id)
        .by_intersection()
}

impl<P: ConnectionPool> BotDb<P> {
    pub async fn set_afk(&self, user_id: i64, guild_id: i64, message: &str) -> StoreResult<()> {
        self.store
            .execute(
                Statement::new(
                    "INSERT INTO afk (user_id, guild_id, message) VALUES ($1, $2, $3) \
                     ON CONFLICT (user_id, guild_id) DO UPDATE \
                     SET message = $3, created_at = NOW()",
                )
                .bind(user_id)
                .bind(guild_id)
                .bind(message)
                .hint(afk_write_hint(user_id, guild_id)),
            )
            .await?;
        Ok(())
    }

    pub async fn get_afk(&self, user_id: i64, guild_id: i64) -> StoreResult<Option<Afk>> {
        let row = self
            .store
            .fetch_one(
                Statement::new("SELECT * FROM afk WHERE user_id = $1 AND guild_id = $2")
                    .bind(user_id)
                    .bind(guild_id)
                    .hint(CacheHint::table("afk").entity(member(user_id, guild_id))),
            )
            .await?;
        decode_one(row, Afk::from_row)
    }

    /// Clear an AFK status. Returns whether one was set.
    pub async fn remove_afk(&self, user_id: i64, guild_id: i64) -> StoreResult<bool> {
        let affected = self
            .store
            .execute(
                Statement::new("DELETE FROM afk WHERE user_id = $1 AND guild_id = $2")
                    .bind(user_id)
                    .bind(guild_id)
                    .hint(afk_write_hint(user_id, guild_id)),
            )
            .await?;
        Ok(affected > 0)
    }

    /// Every AFK member of a guild.
    pub async fn get_guild_afk(&self, guild_id: i64) -> StoreResult<Vec<Afk>> {
        let rows = self
            .store
            .fetch_all(
                Statement::new("SELECT * FROM afk WHERE guild_id = $1")
                    .bind(guild_id)
                    .hint(CacheHint::table("afk").entity(guild_id)),
            )
            .await?;
        decode_all(rows, Afk::from_row)
    }
}
