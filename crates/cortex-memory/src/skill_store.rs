//! SQLite-backed [`SkillStore`].
//!
//! # Storage layout
//!
//! A single table `skills` is created (if it does not already exist):
//!
//! | column         | type    | description                                 |
//! |----------------|---------|---------------------------------------------|
//! | id             | TEXT    | Category key, primary key                   |
//! | name           | TEXT    | Human-readable skill name                   |
//! | intent         | TEXT    | What the pattern accomplishes               |
//! | steps          | TEXT    | JSON array of step descriptions             |
//! | success_rate   | REAL    | Estimated success rate in `[0, 1]`          |
//! | last_used      | TEXT    | RFC-3339 timestamp (UTC)                    |
//! | evidence_count | INTEGER | Number of chunks the skill was mined from   |

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::skills::{SkillRecord, SkillStore, SkillStoreError};

/// Synthesized skills persisted in a local SQLite database.
pub struct SqliteSkillStore {
    conn: Connection,
}

impl SqliteSkillStore {
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
            "CREATE TABLE IF NOT EXISTS skills (
                id             TEXT NOT NULL PRIMARY KEY,
                name           TEXT NOT NULL,
                intent         TEXT NOT NULL,
                steps          TEXT NOT NULL,
                success_rate   REAL NOT NULL,
                last_used      TEXT NOT NULL,
                evidence_count INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Fetch a single skill by id.
    pub fn get(&self, id: &str) -> Result<Option<SkillRecord>, SkillStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, intent, steps, success_rate, last_used, evidence_count
             FROM skills WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_raw)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.into_record()?)),
            None => Ok(None),
        }
    }

    /// All skills, highest success rate first.
    pub fn list(&self) -> Result<Vec<SkillRecord>, SkillStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, intent, steps, success_rate, last_used, evidence_count
             FROM skills ORDER BY success_rate DESC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_raw)?;
        let mut skills = Vec::new();
        for raw in rows {
            skills.push(raw?.into_record()?);
        }
        Ok(skills)
    }
}

impl SkillStore for SqliteSkillStore {
    fn has_skill(&self, id: &str) -> Result<bool, SkillStoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM skills WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn add_skill(&self, record: &SkillRecord) -> Result<(), SkillStoreError> {
        let steps = serde_json::to_string(&record.steps)?;
        let evidence_count = i64::try_from(record.evidence_count).unwrap_or(i64::MAX);
        self.conn.execute(
            "INSERT OR REPLACE INTO skills
                 (id, name, intent, steps, success_rate, last_used, evidence_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.name,
                record.intent,
                steps,
                record.success_rate,
                record.last_used.to_rfc3339(),
                evidence_count,
            ],
        )?;
        Ok(())
    }
}

/// Row as stored; the JSON steps column is decoded afterwards so its error
/// surfaces as [`SkillStoreError::Json`].
struct RawSkill {
    id: String,
    name: String,
    intent: String,
    steps: String,
    success_rate: f64,
    last_used: DateTime<Utc>,
    evidence_count: i64,
}

impl RawSkill {
    fn into_record(self) -> Result<SkillRecord, SkillStoreError> {
        Ok(SkillRecord {
            id: self.id,
            name: self.name,
            intent: self.intent,
            steps: serde_json::from_str(&self.steps)?,
            success_rate: self.success_rate,
            last_used: self.last_used,
            evidence_count: usize::try_from(self.evidence_count).unwrap_or_default(),
        })
    }
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSkill> {
    let last_used: String = row.get(5)?;
    let last_used = last_used.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::InvalidColumnType(5, e.to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(RawSkill {
        id: row.get(0)?,
        name: row.get(1)?,
        intent: row.get(2)?,
        steps: row.get(3)?,
        success_rate: row.get(4)?,
        last_used,
        evidence_count: row.get(6)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
