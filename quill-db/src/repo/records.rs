//! Typed records decoded from result rows.

use quill_core::{Row, Timestamp, ValueResult};
use serde::{Deserialize, Serialize};

/// A guild the bot has joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: i64,
    pub name: String,
    pub joined_at: Option<Timestamp>,
    pub last_active: Option<Timestamp>,
}

impl Guild {
    pub fn from_row(row: &Row) -> ValueResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            joined_at: row.try_get("joined_at")?,
            last_active: row.try_get("last_active")?,
        })
    }
}

/// A user the bot has seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub discriminator: Option<String>,
    pub first_seen: Option<Timestamp>,
    pub last_active: Option<Timestamp>,
}

impl User {
    pub fn from_row(row: &Row) -> ValueResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            discriminator: row.try_get("discriminator")?,
            first_seen: row.try_get("first_seen")?,
            last_active: row.try_get("last_active")?,
        })
    }
}

/// A guild-scoped text snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub guild_id: i64,
    /// Owner.
    pub user_id: i64,
    pub name: String,
    pub content: String,
    pub uses: i64,
    pub created_at: Option<Timestamp>,
}

impl Tag {
    pub fn from_row(row: &Row) -> ValueResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            guild_id: row.try_get("guild_id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            content: row.try_get("content")?,
            uses: row.try_get("uses")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// An AFK status for one user in one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Afk {
    pub user_id: i64,
    pub guild_id: i64,
    pub message: String,
    pub created_at: Option<Timestamp>,
}

impl Afk {
    pub fn from_row(row: &Row) -> ValueResult<Self> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            guild_id: row.try_get("guild_id")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{Value, ValueError};

    #[test]
    fn test_tag_from_row() {
        let row = Row::new()
            .with("id", 3i64)
            .with("guild_id", 10i64)
            .with("user_id", 20i64)
            .with("name", "rules")
            .with("content", "be nice")
            .with("uses", 4i64)
            .with("created_at", Value::Null);
        let tag = Tag::from_row(&row).expect("decodes");
        assert_eq!(tag.name, "rules");
        assert_eq!(tag.uses, 4);
        assert_eq!(tag.created_at, None);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let row = Row::new().with("id", 1i64);
        assert_eq!(
            Guild::from_row(&row),
            Err(ValueError::MissingColumn {
                column: "name".into()
            })
        );
    }

    #[test]
    fn test_user_optional_fields() {
        let row = Row::new()
            .with("id", 1i64)
            .with("username", Value::Null)
            .with("discriminator", "0001")
            .with("first_seen", Value::Null)
            .with("last_active", Value::Null);
        let user = User::from_row(&row).expect("decodes");
        assert_eq!(user.username, None);
        assert_eq!(user.discriminator.as_deref(), Some("0001"));
    }
}
