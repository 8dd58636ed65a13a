//! Guild tags.

use quill_cache::CacheHint;

use super::records::Tag;
use super::{decode_all, decode_one, BotDb};
use crate::error::{StoreError, StoreResult};
use crate::pool::ConnectionPool;
use crate::statement::Statement;

fn guild_tags(guild_id: i64) -> CacheHint {
    CacheHint::table("tags").entity(guild_id)
}

impl<P: ConnectionPool> BotDb<P> {
    pub async fn get_tag(&self, guild_id: i64, name: &str) -> StoreResult<Option<Tag>> {
        let row = self
            .store
            .fetch_one(
                Statement::new("SELECT * FROM tags WHERE guild_id = $1 AND name = $2")
                    .bind(guild_id)
                    .bind(name)
                    .hint(guild_tags(guild_id)),
            )
            .await?;
        decode_one(row, Tag::from_row)
    }

    /// Every tag of a guild, by name.
    pub async fn get_tags(&self, guild_id: i64) -> StoreResult<Vec<Tag>> {
        let rows = self
            .store
            .fetch_all(
                Statement::new("SELECT * FROM tags WHERE guild_id = $1 ORDER BY name")
                    .bind(guild_id)
                    .hint(guild_tags(guild_id)),
            )
            .await?;
        decode_all(rows, Tag::from_row)
    }

    pub async fn create_tag(
        &self,
        guild_id: i64,
        user_id: i64,
        name: &str,
        content: &str,
    ) -> StoreResult<Tag> {
        let row = self
            .store
            .fetch_one(
                Statement::new(
                    "INSERT INTO tags (guild_id, user_id, name, content) \
                     VALUES ($1, $2, $3, $4) RETURNING *",
                )
                .bind(guild_id)
                .bind(user_id)
                .bind(name)
                .bind(content)
                .hint(guild_tags(guild_id).by_intersection()),
            )
            .await?;
        decode_one(row, Tag::from_row)?
            .ok_or_else(|| StoreError::statement("INSERT INTO tags returned no row"))
    }

    /// Change a tag's name and/or content. `None` leaves the field as is.
    pub async fn update_tag(
        &self,
        tag: &Tag,
        name: Option<&str>,
        content: Option<&str>,
    ) -> StoreResult<u64> {
        self.store
            .execute(
                Statement::new(
                    "UPDATE tags SET name = COALESCE($2, name), content = COALESCE($3, content) \
                     WHERE id = $1",
                )
                .bind(tag.id)
                .bind(name)
                .bind(content)
                .hint(
                    CacheHint::table("tags")
                        .entity(tag.id)
                        .entity(tag.guild_id)
                        .by_intersection(),
                ),
            )
            .await
    }

    pub async fn rename_tag(&self, tag: &Tag, new_name: &str) -> StoreResult<u64> {
        self.update_tag(tag, Some(new_name), None).await
    }

    /// Delete one tag. Every cached read that returned it carries its id,
    /// so the id alone is enough to invalidate.
    pub async fn delete_tag(&self, tag_id: i64) -> StoreResult<bool> {
        let affected = self
            .store
            .execute(
                Statement::new("DELETE FROM tags WHERE id = $1")
                    .bind(tag_id)
                    .hint(CacheHint::table("tags").entity(tag_id).by_intersection()),
            )
            .await?;
        Ok(affected > 0)
    }

    /// Count one use of a tag.
    pub async fn use_tag(&self, tag_id: i64) -> StoreResult<()> {
        self.store
            .execute(
                Statement::new("UPDATE tags SET uses = uses + 1 WHERE id = $1")
                    .bind(tag_id)
                    .hint(CacheHint::table("tags").entity(tag_id).by_entity()),
            )
            .await?;
        Ok(())
    }

    /// Delete every tag of a guild. Returns how many were removed.
    pub async fn reset_tags(&self, guild_id: i64) -> StoreResult<u64> {
        self.store
            .execute(
                Statement::new("DELETE FROM tags WHERE guild_id = $1")
                    .bind(guild_id)
                    .hint(guild_tags(guild_id).by_intersection()),
            )
            .await
    }

    /// Hand a tag to a new owner, provided `current_owner` still owns it.
    ///
    /// Runs as read-then-write in one transaction with the row locked.
    /// Returns the updated tag, or `None` if the tag is gone or owned by
    /// someone else.
    pub async fn transfer_tag(
        &self,
        tag_id: i64,
        current_owner: i64,
        new_owner: i64,
    ) -> StoreResult<Option<Tag>> {
        let mut tx = self.store.begin().await?;

        let row = tx
            .fetch_one(
                Statement::new("SELECT * FROM tags WHERE id = $1 FOR UPDATE").bind(tag_id),
            )
            .await?;
        let Some(tag) = decode_one(row, Tag::from_row)? else {
            tx.rollback().await?;
            return Ok(None);
        };
        if tag.user_id != current_owner {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = tx
            .fetch_one(
                Statement::new("UPDATE tags SET user_id = $2 WHERE id = $1 RETURNING *")
                    .bind(tag_id)
                    .bind(new_owner)
                    .hint(
                        CacheHint::table("tags")
                            .entity(tag_id)
                            .entity(tag.guild_id)
                            .by_intersection(),
                    ),
            )
            .await?;
        let updated = decode_one(row, Tag::from_row)?;
        tx.commit().await?;
        Ok(updated)
    }
}
