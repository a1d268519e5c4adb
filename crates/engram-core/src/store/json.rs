//! Single-file JSON store. Whole-document rewrite on every write;
//! simple and human-inspectable, not intended for large namespaces.

use super::{apply_filter_sort_limit, Store, StoreFilter};
use crate::model::Memory;
use crate::tokenizer::tokenize;
use crate::{EngramError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct Document {
    memories: Vec<Memory>,
}

/// File-backed store. The whole document is read on `init`/first access and
/// rewritten on every mutation; fine for the sizes this engine targets
/// (Non-goal: no distributed storage).
pub struct JsonStore {
    path: PathBuf,
    document: RwLock<Document>,
}

impl JsonStore {
    /// Open (or create) the JSON document at `path`. If the file exists but
    /// cannot be parsed, it is renamed aside to `<path>.corrupted.<unix_ms>`
    /// and a fresh empty document is started, rather than failing outright.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = Self::load(&path)?;
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    fn load(path: &Path) -> Result<Document> {
        if !path.exists() {
            return Ok(Document::default());
        }

        let raw = fs::read_to_string(path)
            .map_err(|e| EngramError::Store(format!("reading {}: {e}", path.display())))?;

        match serde_json::from_str(&raw) {
            Ok(document) => Ok(document),
            Err(_) => {
                let unix_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis();
                let corrupted = path.with_extension(format!("corrupted.{unix_ms}"));
                fs::rename(path, &corrupted).map_err(|e| {
                    EngramError::Store(format!(
                        "recovering corrupted store at {}: {e}",
                        path.display()
                    ))
                })?;
                tracing::warn!(
                    original = %path.display(),
                    recovered_as = %corrupted.display(),
                    "json store was corrupted, starting fresh"
                );
                Ok(Document::default())
            }
        }
    }

    fn persist(&self, document: &Document) -> Result<()> {
        let serialized = serde_json::to_string_pretty(document)
            .map_err(|e| EngramError::Store(format!("serializing store: {e}")))?;
        fs::write(&self.path, serialized)
            .map_err(|e| EngramError::Store(format!("writing {}: {e}", self.path.display())))
    }
}

impl Store for JsonStore {
    fn get(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self
            .document
            .read()
            .unwrap()
            .memories
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    fn put(&self, memory: Memory) -> Result<()> {
        let mut document = self.document.write().unwrap();
        if let Some(existing) = document.memories.iter_mut().find(|m| m.id == memory.id) {
            *existing = memory;
        } else {
            document.memories.push(memory);
        }
        self.persist(&document)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut document = self.document.write().unwrap();
        let before = document.memories.len();
        document.memories.retain(|m| m.id != id);
        let removed = document.memories.len() != before;
        if removed {
            self.persist(&document)?;
        }
        Ok(removed)
    }

    fn list(&self, filter: &StoreFilter) -> Result<Vec<Memory>> {
        let all = self.document.read().unwrap().memories.clone();
        Ok(apply_filter_sort_limit(all, filter))
    }

    fn search(&self, namespace: &str, tokens: &[String], limit: usize) -> Result<Vec<Memory>> {
        let query: std::collections::HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let document = self.document.read().unwrap();
        let mut scored: Vec<(usize, Memory)> = document
            .memories
            .iter()
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
            .document
            .read()
            .unwrap()
            .memories
            .iter()
            .filter(|m| m.namespace == namespace)
            .count())
    }

    fn clear(&self, namespace: &str) -> Result<usize> {
        let mut document = self.document.write().unwrap();
        let before = document.memories.len();
        document.memories.retain(|m| m.namespace != namespace);
        let removed = before - document.memories.len();
        self.persist(&document)?;
        Ok(removed)
    }

    fn dump(&self) -> Result<Vec<Memory>> {
        Ok(self.document.read().unwrap().memories.clone())
    }

    fn init(&self) -> Result<()> {
        if !self.path.exists() {
            self.persist(&self.document.read().unwrap())?;
        }
        Ok(())
    }
}
