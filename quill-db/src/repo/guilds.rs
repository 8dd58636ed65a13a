//! Guild and user records.

use quill_cache::CacheHint;

use super::records::{Guild, User};
use super::{decode_one, BotDb};
use crate::error::StoreResult;
use crate::pool::ConnectionPool;
use crate::statement::Statement;

impl<P: ConnectionPool> BotDb<P> {
    pub async fn get_guild(&self, guild_id: i64) -> StoreResult<Option<Guild>> {
        let row = self
            .store
            .fetch_one(
                Statement::new("SELECT * FROM guilds WHERE id = $1")
                    .bind(guild_id)
                    .hint(CacheHint::table("guilds").entity(guild_id)),
            )
            .await?;
        decode_one(row, Guild::from_row)
    }

    /// Insert or rename a guild and bump its activity time.
    pub async fn upsert_guild(&self, guild_id: i64, name: &str) -> StoreResult<()> {
        self.store
            .execute(
                Statement::new(
                    "INSERT INTO guilds (id, name, last_active) VALUES ($1, $2, NOW()) \
                     ON CONFLICT (id) DO UPDATE SET name = $2, last_active = NOW()",
                )
                .bind(guild_id)
                .bind(name)
                .hint(CacheHint::table("guilds").entity(guild_id).by_intersection()),
            )
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> StoreResult<Option<User>> {
        let row = self
            .store
            .fetch_one(
                Statement::new("SELECT * FROM users WHERE id = $1")
                    .bind(user_id)
                    .hint(CacheHint::table("users").entity(user_id)),
            )
            .await?;
        decode_one(row, User::from_row)
    }

    /// Insert or update a user and bump its activity time.
    pub async fn upsert_user(
        &self,
        user_id: i64,
        username: &str,
        discriminator: Option<&str>,
    ) -> StoreResult<()> {
        self.store
            .execute(
                Statement::new(
                    "INSERT INTO users (id, username, discriminator, last_active) \
                     VALUES ($1, $2, $3, NOW()) \
                     ON CONFLICT (id) DO UPDATE \
                     SET username = $2, discriminator = $3, last_active = NOW()",
                )
                .bind(user_id)
                .bind(username)
                .bind(discriminator)
                .hint(CacheHint::table("users").entity(user_id).by_intersection()),
            )
            .await?;
        Ok(())
    }
}
