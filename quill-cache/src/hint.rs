//! Caller-supplied cache hints.
//!
//! A hint states which table a statement depends on (or modifies) and which
//! entities it concerns. When present it replaces text classification for
//! that call; the classifier only runs for statements without one.

use quill_core::EntityId;

/// How a write with a hint invalidates the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationScope {
    /// Drop every entry that depends on the table.
    #[default]
    Table,
    /// Drop every entry registered under any of the hinted entity ids,
    /// whatever its table.
    Entities,
    /// Drop only entries registered under both the table and one of the
    /// hinted entity ids.
    Intersection,
}

/// Table and entity information attached to a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHint {
    pub table: String,
    pub entity_ids: Vec<EntityId>,
    pub scope: InvalidationScope,
}

impl CacheHint {
    /// Hint naming only the table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            entity_ids: Vec::new(),
            scope: InvalidationScope::Table,
        }
    }

    /// Add one entity id.
    pub fn entity(mut self, id: impl Into<EntityId>) -> Self {
        self.entity_ids.push(id.into());
        self
    }

    /// Add several entity ids.
    pub fn entities<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<EntityId>,
    {
        self.entity_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Invalidate by entity instead of by table on write.
    pub fn by_entity(mut self) -> Self {
        self.scope = InvalidationScope::Entities;
        self
    }

    /// Invalidate only entries in both the table and entity buckets on write.
    pub fn by_intersection(mut self) -> Self {
        self.scope = InvalidationScope::Intersection;
        self
    }
}
