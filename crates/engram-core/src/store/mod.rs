//! Store — pluggable persistence.
//!
//! Three adapters ship with this crate: [`memory::MemoryStore`] (ephemeral,
//! default), [`json::JsonStore`] (single-file, human-inspectable), and,
//! behind the `sqlite-store` feature, [`sqlite::SqliteStore`].

mod json;
mod memory;
#[cfg(feature = "sqlite-store")]
mod sqlite;

pub use json::JsonStore;
pub use memory::MemoryStore;
#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteStore;

use crate::model::Memory;
use crate::Result;

/// Sort order for [`Store::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Field to sort [`Store::list`] results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    CreatedAt,
    LastAccessed,
    Importance,
    Surprise,
}

/// Filter applied by [`Store::list`] and [`Store::search`]. All fields are
/// conjunctive (AND); `None`/empty means "no constraint on this field":
/// namespace, categories, minImportance, maxAge, since, metadata equality,
/// limit, offset, sortBy, sortOrder.
#[derive(Debug, Clone, Default)]
pub struct StoreFilter {
    pub namespace: Option<String>,
    /// Category whitelist; empty means no constraint. A non-empty list
    /// matches any memory whose category appears in it.
    pub categories: Vec<String>,
    pub min_importance: Option<f32>,
    pub since: Option<crate::model::Millis>,
    pub metadata: Vec<(String, serde_json::Value)>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl StoreFilter {
    /// A filter scoped to a single namespace with no other constraints.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    fn matches(&self, memory: &Memory) -> bool {
        if let Some(ns) = &self.namespace {
            if &memory.namespace != ns {
                return false;
            }
        }
        if !self.categories.is_empty() && !self.categories.contains(&memory.category) {
            return false;
        }
        if let Some(min_importance) = self.min_importance {
            if memory.importance < min_importance {
                return false;
            }
        }
        if let Some(since) = self.since {
            if memory.created_at < since {
                return false;
            }
        }
        for (key, value) in &self.metadata {
            if memory.metadata.get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}

fn apply_sort(memories: &mut [Memory], filter: &StoreFilter) {
    let Some(sort_by) = filter.sort_by else {
        return;
    };
    memories.sort_by(|a, b| {
        let cmp = match sort_by {
            SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            SortBy::LastAccessed => a.last_accessed.cmp(&b.last_accessed),
            SortBy::Importance => a
                .importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal),
            SortBy::Surprise => a
                .surprise
                .partial_cmp(&b.surprise)
                .unwrap_or(std::cmp::Ordering::Equal),
        };
        match filter.sort_order {
            Some(SortOrder::Descending) => cmp.reverse(),
            _ => cmp,
        }
    });
}

fn apply_filter_sort_limit(mut memories: Vec<Memory>, filter: &StoreFilter) -> Vec<Memory> {
    memories.retain(|m| filter.matches(m));
    apply_sort(&mut memories, filter);
    if let Some(offset) = filter.offset {
        if offset >= memories.len() {
            memories.clear();
        } else {
            memories.drain(..offset);
        }
    }
    if let Some(limit) = filter.limit {
        memories.truncate(limit);
    }
    memories
}

/// Pluggable persistence backend.
///
/// Implementations need not support `vector_search`; the engine falls back
/// to keyword-only retrieval when it returns `Ok(None)` (the default).
pub trait Store: Send + Sync {
    /// Fetch a memory by id, regardless of namespace.
    fn get(&self, id: &str) -> Result<Option<Memory>>;

    /// Insert or replace a memory.
    fn put(&self, memory: Memory) -> Result<()>;

    /// Remove a memory by id. Returns `true` if a record was removed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// `true` if a memory with this id exists.
    fn has(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// List memories matching `filter`.
    fn list(&self, filter: &StoreFilter) -> Result<Vec<Memory>>;

    /// Keyword search: return memories in `namespace` whose content shares
    /// at least one token with `tokens`, most-overlapping first.
    fn search(&self, namespace: &str, tokens: &[String], limit: usize) -> Result<Vec<Memory>>;

    /// Vector search, if the backend maintains an index. The default
    /// implementation reports no support; callers degrade to keyword-only.
    fn vector_search(
        &self,
        _namespace: &str,
        _query_embedding: &[f32],
        _limit: usize,
    ) -> Result<Option<Vec<Memory>>> {
        Ok(None)
    }

    /// Insert or replace many memories at once.
    fn put_many(&self, memories: Vec<Memory>) -> Result<()> {
        for memory in memories {
            self.put(memory)?;
        }
        Ok(())
    }

    /// Delete many memories by id. Returns the number actually removed.
    fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            if self.delete(id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Count memories in `namespace`.
    fn count(&self, namespace: &str) -> Result<usize>;

    /// Remove every memory whose id is in `ids`, for pruning. Equivalent to
    /// `delete_many` but named separately to mirror vocabulary.
    fn prune(&self, ids: &[String]) -> Result<usize> {
        self.delete_many(ids)
    }

    /// Remove every memory in `namespace`.
    fn clear(&self, namespace: &str) -> Result<usize>;

    /// Dump every memory across all namespaces, for export.
    fn dump(&self) -> Result<Vec<Memory>>;

    /// Perform any one-time setup (opening files, running migrations).
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Release any held resources. Best-effort; stores may no-op.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn make_memory(id: &str, category: &str, importance: f32, created_at: crate::model::Millis) -> Memory {
        make_memory_with_surprise(id, category, importance, importance, created_at)
    }

    fn make_memory_with_surprise(
        id: &str,
        category: &str,
        importance: f32,
        surprise: f32,
        created_at: crate::model::Millis,
    ) -> Memory {
        Memory {
            id: id.to_string(),
            content: id.to_string(),
            category: category.to_string(),
            source: "test".to_string(),
            surprise,
            importance,
            access_count: 0,
            last_accessed: created_at,
            created_at,
            embedding: None,
            metadata: HashMap::new(),
            namespace: "default".to_string(),
            ttl: None,
            expires_at: None,
            version: 1,
            history: vec![],
        }
    }

    #[test]
    fn category_whitelist_filters_other_categories() {
        let store = MemoryStore::new();
        store.put(make_memory("a", "fact", 1.0, 0)).unwrap();
        store.put(make_memory("b", "skill", 1.0, 0)).unwrap();
        store.put(make_memory("c", "episode", 1.0, 0)).unwrap();

        let filter = StoreFilter {
            categories: vec!["fact".to_string(), "skill".to_string()],
            ..StoreFilter::namespace("default")
        };
        let mut ids: Vec<String> = store.list(&filter).unwrap().into_iter().map(|m| m.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn empty_category_whitelist_matches_everything() {
        let store = MemoryStore::new();
        store.put(make_memory("a", "fact", 1.0, 0)).unwrap();
        store.put(make_memory("b", "skill", 1.0, 0)).unwrap();

        let results = store.list(&StoreFilter::namespace("default")).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn min_importance_filters_below_threshold() {
        let store = MemoryStore::new();
        store.put(make_memory("a", "fact", 0.2, 0)).unwrap();
        store.put(make_memory("b", "fact", 0.8, 0)).unwrap();

        let filter = StoreFilter {
            min_importance: Some(0.5),
            ..StoreFilter::namespace("default")
        };
        let results = store.list(&filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[test]
    fn offset_skips_leading_results_after_sort() {
        let store = MemoryStore::new();
        store.put(make_memory("a", "fact", 1.0, 0)).unwrap();
        store.put(make_memory("b", "fact", 1.0, 1)).unwrap();
        store.put(make_memory("c", "fact", 1.0, 2)).unwrap();

        let filter = StoreFilter {
            sort_by: Some(SortBy::CreatedAt),
            sort_order: Some(SortOrder::Ascending),
            offset: Some(1),
            ..StoreFilter::namespace("default")
        };
        let results = store.list(&filter).unwrap();
        let ids: Vec<String> = results.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn sorts_by_surprise() {
        let store = MemoryStore::new();
        store.put(make_memory_with_surprise("a", "fact", 1.0, 0.2, 0)).unwrap();
        store.put(make_memory_with_surprise("b", "fact", 1.0, 0.9, 1)).unwrap();

        let filter = StoreFilter {
            sort_by: Some(SortBy::Surprise),
            sort_order: Some(SortOrder::Descending),
            ..StoreFilter::namespace("default")
        };
        let results = store.list(&filter).unwrap();
        let ids: Vec<String> = results.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn offset_past_end_yields_empty() {
        let store = MemoryStore::new();
        store.put(make_memory("a", "fact", 1.0, 0)).unwrap();

        let filter = StoreFilter {
            offset: Some(5),
            ..StoreFilter::namespace("default")
        };
        assert!(store.list(&filter).unwrap().is_empty());
    }
}
