//! SQLite-backed store (feature `sqlite-store`), using a dedicated
//! reader/writer connection pair and a versioned migration table.

use super::{apply_filter_sort_limit, Store, StoreFilter};
use crate::model::{HistoryEntry, Memory};
use crate::{EngramError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

struct Migration {
    version: i64,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up: "
        CREATE TABLE memories (
            id              TEXT PRIMARY KEY,
            content         TEXT NOT NULL,
            category        TEXT NOT NULL,
            source          TEXT NOT NULL,
            surprise        REAL NOT NULL,
            importance      REAL NOT NULL,
            access_count    INTEGER NOT NULL,
            last_accessed   INTEGER NOT NULL,
            created_at      INTEGER NOT NULL,
            embedding       BLOB,
            metadata        TEXT NOT NULL,
            namespace       TEXT NOT NULL,
            ttl             INTEGER,
            expires_at      INTEGER,
            version         INTEGER NOT NULL,
            history         TEXT NOT NULL
        );
        CREATE INDEX idx_memories_namespace ON memories(namespace);
        CREATE VIRTUAL TABLE memories_fts USING fts5(
            id UNINDEXED, content, namespace UNINDEXED
        );
    ",
}];

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY)",
    )
    .map_err(|e| EngramError::Store(format!("creating migrations table: {e}")))?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| EngramError::Store(format!("reading schema version: {e}")))?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.up)
            .map_err(|e| EngramError::Store(format!("migration {}: {e}", migration.version)))?;
        conn.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            params![migration.version],
        )
        .map_err(|e| EngramError::Store(format!("recording migration {}: {e}", migration.version)))?;
    }
    Ok(())
}

/// SQLite-backed store using FTS5 for keyword search. Does not implement
/// `vector_search`; callers fall back to keyword retrieval.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, running any pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let writer = Connection::open(path)
            .map_err(|e| EngramError::Store(format!("opening {}: {e}", path.display())))?;
        configure_connection(&writer)
            .map_err(|e| EngramError::Store(format!("configuring connection: {e}")))?;
        run_migrations(&writer)?;

        let reader = Connection::open(path)
            .map_err(|e| EngramError::Store(format!("opening reader for {}: {e}", path.display())))?;
        configure_connection(&reader)
            .map_err(|e| EngramError::Store(format!("configuring reader connection: {e}")))?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// Open an in-memory database, mainly for tests. A plain `:memory:` URI
    /// opens a distinct database per connection, so this uses a shared,
    /// named in-memory database for both the reader and writer handles.
    pub fn open_in_memory() -> Result<Self> {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let uri = format!(
            "file:engram-{}?mode=memory&cache=shared",
            COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        );
        let writer = Connection::open(&uri)
            .map_err(|e| EngramError::Store(format!("opening in-memory db: {e}")))?;
        run_migrations(&writer)?;
        let reader = Connection::open(&uri)
            .map_err(|e| EngramError::Store(format!("opening in-memory reader: {e}")))?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
        let embedding = embedding_blob.map(|blob| {
            blob.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        });
        let metadata_json: String = row.get("metadata")?;
        let history_json: String = row.get("history")?;

        Ok(Memory {
            id: row.get("id")?,
            content: row.get("content")?,
            category: row.get("category")?,
            source: row.get("source")?,
            surprise: row.get("surprise")?,
            importance: row.get("importance")?,
            access_count: row.get("access_count")?,
            last_accessed: row.get("last_accessed")?,
            created_at: row.get("created_at")?,
            embedding,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            namespace: row.get("namespace")?,
            ttl: row.get("ttl")?,
            expires_at: row.get("expires_at")?,
            version: row.get("version")?,
            history: serde_json::from_str::<Vec<HistoryEntry>>(&history_json).unwrap_or_default(),
        })
    }
}

impl Store for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.reader.lock().unwrap();
        conn.query_row("SELECT * FROM memories WHERE id = ?1", params![id], Self::row_to_memory)
            .optional()
            .map_err(|e| EngramError::Store(format!("get {id}: {e}")))
    }

    fn put(&self, memory: Memory) -> Result<()> {
        let conn = self.writer.lock().unwrap();
        let embedding_blob: Option<Vec<u8>> = memory
            .embedding
            .as_ref()
            .map(|v| v.iter().flat_map(|f| f.to_le_bytes()).collect());
        let metadata_json = serde_json::to_string(&memory.metadata)
            .map_err(|e| EngramError::Store(format!("serializing metadata: {e}")))?;
        let history_json = serde_json::to_string(&memory.history)
            .map_err(|e| EngramError::Store(format!("serializing history: {e}")))?;

        conn.execute(
            "INSERT INTO memories (
                id, content, category, source, surprise, importance, access_count,
                last_accessed, created_at, embedding, metadata, namespace, ttl,
                expires_at, version, history
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)
            ON CONFLICT(id) DO UPDATE SET
                content=excluded.content, category=excluded.category, source=excluded.source,
                surprise=excluded.surprise, importance=excluded.importance,
                access_count=excluded.access_count, last_accessed=excluded.last_accessed,
                embedding=excluded.embedding, metadata=excluded.metadata,
                namespace=excluded.namespace, ttl=excluded.ttl, expires_at=excluded.expires_at,
                version=excluded.version, history=excluded.history",
            params![
                memory.id,
                memory.content,
                memory.category,
                memory.source,
                memory.surprise,
                memory.importance,
                memory.access_count,
                memory.last_accessed,
                memory.created_at,
                embedding_blob,
                metadata_json,
                memory.namespace,
                memory.ttl,
                memory.expires_at,
                memory.version,
                history_json,
            ],
        )
        .map_err(|e| EngramError::Store(format!("put {}: {e}", memory.id)))?;

        conn.execute("DELETE FROM memories_fts WHERE id = ?1", params![memory.id])
            .map_err(|e| EngramError::Store(format!("reindexing {}: {e}", memory.id)))?;
        conn.execute(
            "INSERT INTO memories_fts(id, content, namespace) VALUES (?1, ?2, ?3)",
            params![memory.id, memory.content, memory.namespace],
        )
        .map_err(|e| EngramError::Store(format!("indexing {}: {e}", memory.id)))?;

        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.writer.lock().unwrap();
        let removed = conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id])
            .map_err(|e| EngramError::Store(format!("delete {id}: {e}")))?;
        conn.execute("DELETE FROM memories_fts WHERE id = ?1", params![id])
            .map_err(|e| EngramError::Store(format!("deindexing {id}: {e}")))?;
        Ok(removed > 0)
    }

    fn list(&self, filter: &StoreFilter) -> Result<Vec<Memory>> {
        let conn = self.reader.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM memories")
            .map_err(|e| EngramError::Store(format!("preparing list: {e}")))?;
        let rows = stmt
            .query_map([], Self::row_to_memory)
            .map_err(|e| EngramError::Store(format!("listing: {e}")))?;
        let all: Vec<Memory> = rows
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| EngramError::Store(format!("reading list rows: {e}")))?;
        Ok(apply_filter_sort_limit(all, filter))
    }

    fn search(&self, namespace: &str, tokens: &[String], limit: usize) -> Result<Vec<Memory>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let match_query = tokens
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.reader.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT m.* FROM memories m
                 JOIN memories_fts f ON f.id = m.id
                 WHERE m.namespace = ?1 AND memories_fts MATCH ?2
                 ORDER BY rank LIMIT ?3",
            )
            .map_err(|e| EngramError::Store(format!("preparing search: {e}")))?;
        let rows = stmt
            .query_map(params![namespace, match_query, limit as i64], Self::row_to_memory)
            .map_err(|e| EngramError::Store(format!("searching: {e}")))?;
        rows.collect::<rusqlite::Result<_>>()
            .map_err(|e| EngramError::Store(format!("reading search rows: {e}")))
    }

    fn count(&self, namespace: &str) -> Result<usize> {
        let conn = self.reader.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )
            .map_err(|e| EngramError::Store(format!("counting {namespace}: {e}")))?;
        Ok(count as usize)
    }

    fn clear(&self, namespace: &str) -> Result<usize> {
        let conn = self.writer.lock().unwrap();
        let removed = conn
            .execute("DELETE FROM memories WHERE namespace = ?1", params![namespace])
            .map_err(|e| EngramError::Store(format!("clearing {namespace}: {e}")))?;
        conn.execute("DELETE FROM memories_fts WHERE namespace = ?1", params![namespace])
            .map_err(|e| EngramError::Store(format!("deindexing {namespace}: {e}")))?;
        Ok(removed)
    }

    fn dump(&self) -> Result<Vec<Memory>> {
        let conn = self.reader.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM memories")
            .map_err(|e| EngramError::Store(format!("preparing dump: {e}")))?;
        let rows = stmt
            .query_map([], Self::row_to_memory)
            .map_err(|e| EngramError::Store(format!("dumping: {e}")))?;
        rows.collect::<rusqlite::Result<_>>()
            .map_err(|e| EngramError::Store(format!("reading dump rows: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_memory(id: &str, content: &str) -> Memory {
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            category: "fact".to_string(),
            source: "test".to_string(),
            surprise: 1.0,
            importance: 1.0,
            access_count: 0,
            last_accessed: 0,
            created_at: 0,
            embedding: Some(vec![1.0, 0.0, 0.0]),
            metadata: HashMap::new(),
            namespace: "default".to_string(),
            ttl: None,
            expires_at: None,
            version: 1,
            history: vec![],
        }
    }

    #[test]
    fn put_then_get_roundtrips_including_embedding() {
        let store = SqliteStore::open_in_memory().unwrap();
        let memory = make_memory("a", "deploy with vercel");
        store.put(memory.clone()).unwrap();
        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched.content, "deploy with vercel");
        assert_eq!(fetched.embedding, Some(vec![1.0, 0.0, 0.0]));
    }

    #[test]
    fn delete_removes_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(make_memory("a", "x")).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn count_is_namespace_scoped() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(make_memory("a", "x")).unwrap();
        assert_eq!(store.count("default").unwrap(), 1);
        assert_eq!(store.count("other").unwrap(), 0);
    }
}
