//! Bot Repository
//!
//! Typed accessors for the bot's tables on top of the [`Store`]. Every
//! statement carries an explicit [`CacheHint`](quill_cache::CacheHint), so
//! these calls never depend on text classification:
//!
//! | Read                    | Cached under                        |
//! |-------------------------|-------------------------------------|
//! | `get_guild(id)`         | `guilds` + `id`                     |
//! | `get_user(id)`          | `users` + `id`                      |
//! | `get_prefix(scope, id)` | `prefixes` + `scope:id`             |
//! | `get_tag(guild, name)`  | `tags` + guild id (+ tag id)        |
//! | `get_tags(guild)`       | `tags` + guild id (+ every tag id)  |
//! | `get_afk(user, guild)`  | `afk` + `user:guild`                |
//! | `get_guild_afk(guild)`  | `afk` + guild id                    |
//!
//! Writes invalidate the intersection of their table and the entities they
//! touch, so a tag edit in one guild never evicts another guild's cache.

mod afk;
mod guilds;
mod prefixes;
mod records;
mod tags;

pub use prefixes::PrefixScope;
pub use records::{Afk, Guild, Tag, User};

use quill_core::{Row, ValueResult};

use crate::error::StoreResult;
use crate::pool::ConnectionPool;
use crate::store::Store;

/// Typed data access for the bot.
#[derive(Clone)]
pub struct BotDb<P: ConnectionPool> {
    store: Store<P>,
}

impl<P: ConnectionPool> BotDb<P> {
    pub fn new(store: Store<P>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store<P> {
        &self.store
    }
}

fn decode_one<T>(row: Option<Row>, decode: fn(&Row) -> ValueResult<T>) -> StoreResult<Option<T>> {
    Ok(row.as_ref().map(decode).transpose()?)
}

fn decode_all<T>(rows: Vec<Row>, decode: fn(&Row) -> ValueResult<T>) -> StoreResult<Vec<T>> {
    Ok(rows.iter().map(decode).collect::<ValueResult<Vec<_>>>()?)
}
