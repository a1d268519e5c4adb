//! In-process, non-persistent store backed by a `HashMap`.

use super::{apply_filter_sort_limit, Store, StoreFilter};
use crate::model::Memory;
use crate::tokenizer::tokenize;
use crate::Result;
use std::collections::HashMap;
use std::sync::RwLock;

/// Ephemeral store; all state is lost when the process exits. Default
/// backend for tests and the CLI's `--ephemeral` mode.
#[derive(Default)]
pub struct MemoryStore {
    memories: RwLock<HashMap<String, Memory>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self.memories.read().unwrap().get(id).cloned())
    }

    fn put(&self, memory: Memory) -> Result<()> {
        self.memories.write().unwrap().insert(memory.id.clone(), memory);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.memories.write().unwrap().remove(id).is_some())
    }

    fn list(&self, filter: &StoreFilter) -> Result<Vec<Memory>> {
        let all: Vec<Memory> = self.memories.read().unwrap().values().cloned().collect();
        Ok(apply_filter_sort_limit(all, filter))
    }

    fn search(&self, namespace: &str, tokens: &[String], limit: usize) -> Result<Vec<Memory>> {
        let query: std::collections::HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let mut scored: Vec<(usize, Memory)> = self
            .memories
            .read()
            .unwrap()
            .values()
            .filter(|m| m.namespace == namespace)
            .filter_map(|m| {
                let content_tokens = tokenize(&m.content);
                let overlap = content_tokens
                    .iter()
                    .filter(|t| query.contains(t.as_str()))
                    .count();
                (overlap > 0).then(|| (overlap, m.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.created_at.cmp(&a.1.created_at)));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, m)| m).collect())
    }

    fn count(&self, namespace: &str) -> Result<usize> {
        Ok(self
            .memories
            .read()
            .unwrap()
            .values()
            .filter(|m| m.namespace == namespace)
            .count())
    }

    fn clear(&self, namespace: &str) -> Result<usize> {
        let mut memories = self.memories.write().unwrap();
        let ids: Vec<String> = memories
            .values()
            .filter(|m| m.namespace == namespace)
            .map(|m| m.id.clone())
            .collect();
        for id in &ids {
            memories.remove(id);
        }
        Ok(ids.len())
    }

    fn dump(&self) -> Result<Vec<Memory>> {
        Ok(self.memories.read().unwrap().values().cloned().collect())
    }
}
