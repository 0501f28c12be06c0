//! SQLite-backed [`ChunkSource`].
//!
//! Holds the raw text side of the agent's interaction log so skill synthesis
//! can scan it.  Embeddings and similarity search live elsewhere; this store
//! only tracks text and whether a chunk has been consumed.
//!
//! # Storage layout
//!
//! | column       | type    | description                                   |
//! |--------------|---------|-----------------------------------------------|
//! | id           | TEXT    | UUID v4 primary key                           |
//! | created_at   | TEXT    | RFC-3339 creation time (UTC)                  |
//! | text         | TEXT    | Raw chunk text                                |
//! | consolidated | INTEGER | `1` once skill synthesis has scanned the chunk |
//!
//! # Example
//!
//! ```rust
//! use cortex_memory::chunk_store::SqliteChunkStore;
//! use cortex_memory::skills::ChunkSource;
//!
//! let store = SqliteChunkStore::open_in_memory().unwrap();
//! let id = store.insert("Ran web_search for train times").unwrap();
//!
//! assert_eq!(store.unconsolidated_chunks().unwrap().len(), 1);
//! store.mark_consolidated(&id).unwrap();
//! assert!(store.unconsolidated_chunks().unwrap().is_empty());
//! ```

use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::skills::{Chunk, ChunkSource, SkillStoreError};

/// Interaction chunks persisted in a local SQLite database.
pub struct SqliteChunkStore {
    conn: Connection,
}

impl SqliteChunkStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, SkillStoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SkillStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), SkillStoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_chunks (
                id           TEXT NOT NULL PRIMARY KEY,
                created_at   TEXT NOT NULL,
                text         TEXT NOT NULL,
                consolidated INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        Ok(())
    }

    /// Store a new unconsolidated chunk and return its UUID.
    pub fn insert(&self, text: &str) -> Result<String, SkillStoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO memory_chunks (id, created_at, text, consolidated)
             VALUES (?1, ?2, ?3, 0)",
            params![id, Utc::now().to_rfc3339(), text],
        )?;
        Ok(id)
    }

    /// Every chunk, consolidated or not, oldest first.
    pub fn all_chunks(&self) -> Result<Vec<Chunk>, SkillStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, consolidated FROM memory_chunks
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], row_to_chunk)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl ChunkSource for SqliteChunkStore {
    fn unconsolidated_chunks(&self) -> Result<Vec<Chunk>, SkillStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text, consolidated FROM memory_chunks
             WHERE consolidated = 0
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], row_to_chunk)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn mark_consolidated(&self, id: &str) -> Result<(), SkillStoreError> {
        let updated = self.conn.execute(
            "UPDATE memory_chunks SET consolidated = 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(SkillStoreError::ChunkNotFound(id.to_string()));
        }
        Ok(())
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let id: String = row.get(0)?;
    let text: String = row.get(1)?;
    let consolidated: i64 = row.get(2)?;
    Ok(Chunk {
        id,
        text,
        consolidated: consolidated != 0,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
