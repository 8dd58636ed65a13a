//! Command prefix resolution.
//!
//! A message is accepted with the bot's mention as prefix, plus exactly one
//! textual prefix chosen in priority order: the author's personal prefix,
//! else the guild's prefix, else the default. Lookups go through
//! [`BotDb`] and are therefore served from the store cache.

use crate::error::{StoreError, StoreResult};
use crate::pool::ConnectionPool;
use crate::repo::{BotDb, PrefixScope};

/// Longest custom prefix accepted.
pub const MAX_PREFIX_LEN: usize = 10;

/// Prefix used when no custom prefix applies.
pub const DEFAULT_PREFIX: &str = ".";

/// Resolves and manages command prefixes.
#[derive(Clone)]
pub struct PrefixResolver<P: ConnectionPool> {
    db: BotDb<P>,
    default_prefix: String,
}

impl<P: ConnectionPool> PrefixResolver<P> {
    pub fn new(db: BotDb<P>, default_prefix: impl Into<String>) -> Self {
        Self {
            db,
            default_prefix: default_prefix.into(),
        }
    }

    /// Default prefix from `QUILL_PREFIX` (default: `.`).
    pub fn from_env(db: BotDb<P>) -> Self {
        let default_prefix =
            std::env::var("QUILL_PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string());
        Self::new(db, default_prefix)
    }

    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    /// Every prefix accepted for a message from `user_id`, sent in
    /// `guild_id` (`None` for direct messages), to the bot `bot_id`.
    pub async fn resolve(
        &self,
        bot_id: i64,
        user_id: i64,
        guild_id: Option<i64>,
    ) -> StoreResult<Vec<String>> {
        let mut prefixes = vec![format!("<@{bot_id}> "), format!("<@!{bot_id}> ")];
        prefixes.push(self.active_prefix(user_id, guild_id).await?);
        Ok(prefixes)
    }

    /// The single textual prefix in effect.
    pub async fn active_prefix(&self, user_id: i64, guild_id: Option<i64>) -> StoreResult<String> {
        if let Some(prefix) = self.user_prefix(user_id).await? {
            return Ok(prefix);
        }
        if let Some(guild_id) = guild_id {
            if let Some(prefix) = self.guild_prefix(guild_id).await? {
                return Ok(prefix);
            }
        }
        Ok(self.default_prefix.clone())
    }

    pub async fn user_prefix(&self, user_id: i64) -> StoreResult<Option<String>> {
        Ok(self
            .db
            .get_prefix(PrefixScope::User, user_id)
            .await?
            .filter(|p| !p.is_empty()))
    }

    pub async fn guild_prefix(&self, guild_id: i64) -> StoreResult<Option<String>> {
        Ok(self
            .db
            .get_prefix(PrefixScope::Guild, guild_id)
            .await?
            .filter(|p| !p.is_empty()))
    }

    pub async fn set_user_prefix(&self, user_id: i64, prefix: &str) -> StoreResult<()> {
        validate_prefix(prefix)?;
        self.db.set_prefix(PrefixScope::User, user_id, prefix).await
    }

    pub async fn set_guild_prefix(&self, guild_id: i64, prefix: &str) -> StoreResult<()> {
        validate_prefix(prefix)?;
        self.db.set_prefix(PrefixScope::Guild, guild_id, prefix).await
    }

    pub async fn remove_user_prefix(&self, user_id: i64) -> StoreResult<bool> {
        self.db.remove_prefix(PrefixScope::User, user_id).await
    }

    pub async fn remove_guild_prefix(&self, guild_id: i64) -> StoreResult<bool> {
        self.db.remove_prefix(PrefixScope::Guild, guild_id).await
    }
}

/// Reject empty prefixes and prefixes longer than [`MAX_PREFIX_LEN`]
/// characters.
pub fn validate_prefix(prefix: &str) -> StoreResult<()> {
    if prefix.trim().is_empty() {
        return Err(StoreError::usage("prefix must not be empty"));
    }
    if prefix.chars().count() > MAX_PREFIX_LEN {
        return Err(StoreError::usage(format!(
            "prefix must be {MAX_PREFIX_LEN} characters or less"
        )));
    }
    Ok(())
}
