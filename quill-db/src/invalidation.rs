//! What a write drops from the cache.

use quill_cache::{CacheHint, InvalidationScope, QueryCache, TableClassifier};
use quill_core::{EntityId, Value};

/// Planned cache invalidation for one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Invalidation {
    Tables(Vec<String>),
    Entities(Vec<EntityId>),
    Intersection { table: String, ids: Vec<EntityId> },
}

impl Invalidation {
    /// Plan the invalidation for a write. A hint wins over the text; without
    /// one the classifier locates the target. `None` means the target is
    /// unknown and the caller proceeds without invalidating.
    pub(crate) fn plan(
        classifier: &TableClassifier,
        sql: &str,
        params: &[Value],
        hint: Option<&CacheHint>,
    ) -> Option<Self> {
        if let Some(hint) = hint {
            return Some(Self::from_hint(hint));
        }

        let classification = classifier.classify(sql, params);
        if classification.tables.is_empty() {
            tracing::warn!(
                target: "quill::consistency",
                sql,
                "Write target unknown; cached results may be stale until TTL expiry"
            );
            return None;
        }
        Some(Self::Tables(classification.tables))
    }

    fn from_hint(hint: &CacheHint) -> Self {
        // Entity scopes with no ids fall back to the whole table.
        match hint.scope {
            InvalidationScope::Entities if !hint.entity_ids.is_empty() => {
                Self::Entities(hint.entity_ids.clone())
            }
            InvalidationScope::Intersection if !hint.entity_ids.is_empty() => Self::Intersection {
                table: hint.table.clone(),
                ids: hint.entity_ids.clone(),
            },
            _ => Self::Tables(vec![hint.table.clone()]),
        }
    }

    /// Apply to `cache`, returning the number of entries removed.
    pub(crate) fn apply(&self, cache: &QueryCache) -> usize {
        let removed: usize = match self {
            Self::Tables(tables) => tables.iter().map(|t| cache.invalidate_table(t)).sum(),
            Self::Entities(ids) => ids.iter().map(|id| cache.invalidate_entity(id)).sum(),
            Self::Intersection { table, ids } => ids
                .iter()
                .map(|id| cache.invalidate_intersection(table, id))
                .sum(),
        };
        tracing::debug!(plan = ?self, removed, "Applied write invalidation");
        removed
    }
}
