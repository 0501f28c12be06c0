//! Skill Synthesis – mine recurring tool-use patterns into reusable skills.
//!
//! Raw interaction chunks come from a [`ChunkSource`] (the vector store's
//! text side).  Each chunk is classified into zero or more
//! [`PatternCategory`]s by lowercase substring tests; chunks sharing the same
//! set of categories form a group keyed by the sorted, `+`-joined labels
//! (`"command+file-ops"`).  A group with enough instances becomes a
//! [`SkillRecord`] in the [`SkillStore`], once.
//!
//! Every scanned chunk is marked consolidated afterwards, whether or not it
//! contributed to a skill.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Fewer unconsolidated chunks than this and synthesis does nothing.
pub const MIN_CHUNKS: usize = 5;

/// Instances a pattern group needs before it becomes a skill.
pub const MIN_INSTANCES: usize = 3;

/// Characters of each chunk kept as a group example.
pub const EXCERPT_CHARS: usize = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by chunk and skill stores.
#[derive(Error, Debug)]
pub enum SkillStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One raw interaction excerpt from the chunk source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub consolidated: bool,
}

/// A synthesized, reusable pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRecord {
    /// The category key, e.g. `"web-search"` or `"command+file-ops"`.
    pub id: String,
    pub name: String,
    pub intent: String,
    pub steps: Vec<String>,
    pub success_rate: f64,
    pub last_used: DateTime<Utc>,
    pub evidence_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator traits
// ─────────────────────────────────────────────────────────────────────────────

/// Source of raw interaction chunks.
pub trait ChunkSource {
    fn unconsolidated_chunks(&self) -> Result<Vec<Chunk>, SkillStoreError>;
    fn mark_consolidated(&self, id: &str) -> Result<(), SkillStoreError>;
}

/// Destination of synthesized skills.
pub trait SkillStore {
    fn has_skill(&self, id: &str) -> Result<bool, SkillStoreError>;
    fn add_skill(&self, record: &SkillRecord) -> Result<(), SkillStoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// PatternCategory
// ─────────────────────────────────────────────────────────────────────────────

/// Kinds of tool use recognised in chunk text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatternCategory {
    WebSearch,
    Command,
    FileOps,
    Memory,
    Telegram,
}

impl PatternCategory {
    pub const ALL: [PatternCategory; 5] = [
        PatternCategory::WebSearch,
        PatternCategory::Command,
        PatternCategory::FileOps,
        PatternCategory::Memory,
        PatternCategory::Telegram,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PatternCategory::WebSearch => "web-search",
            PatternCategory::Command => "command",
            PatternCategory::FileOps => "file-ops",
            PatternCategory::Memory => "memory",
            PatternCategory::Telegram => "telegram",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            PatternCategory::WebSearch => &[
                "web_search",
                "web search",
                "search the web",
                "searched for",
                "google",
            ],
            PatternCategory::Command => &["exec", "command", "shell", "terminal", "bash"],
            PatternCategory::FileOps => &["read_file", "write_file", "file", "directory"],
            PatternCategory::Memory => &["memory", "remember", "recall"],
            PatternCategory::Telegram => &["telegram"],
        }
    }

    fn step(&self) -> &'static str {
        match self {
            PatternCategory::WebSearch => "Search the web for the requested information",
            PatternCategory::Command => "Run the required shell command",
            PatternCategory::FileOps => "Read or write the relevant files",
            PatternCategory::Memory => "Store or recall the relevant memory",
            PatternCategory::Telegram => "Send the result over Telegram",
        }
    }

    /// Categories whose keywords occur in `text`, in declaration order.
    pub fn classify(text: &str) -> Vec<PatternCategory> {
        let lower = text.to_lowercase();
        Self::ALL
            .into_iter()
            .filter(|cat| cat.keywords().iter().any(|kw| lower.contains(kw)))
            .collect()
    }
}

/// Group key for a category set: sorted labels joined with `+`.
pub fn category_key(categories: &[PatternCategory]) -> String {
    let labels: BTreeSet<&str> = categories.iter().map(|c| c.label()).collect();
    labels.into_iter().collect::<Vec<_>>().join("+")
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis
// ─────────────────────────────────────────────────────────────────────────────

struct PatternGroup {
    categories: Vec<PatternCategory>,
    examples: Vec<String>,
}

/// Run one synthesis pass.  Returns the number of new skills.
pub fn synthesize_skills(
    chunks: &dyn ChunkSource,
    skills: &dyn SkillStore,
    now: DateTime<Utc>,
) -> Result<usize, SkillStoreError> {
    let pending: Vec<Chunk> = chunks
        .unconsolidated_chunks()?
        .into_iter()
        .filter(|c| !c.consolidated)
        .collect();
    if pending.len() < MIN_CHUNKS {
        debug!(pending = pending.len(), "not enough chunks for skill synthesis");
        return Ok(0);
    }

    let mut groups: BTreeMap<String, PatternGroup> = BTreeMap::new();
    for chunk in &pending {
        let categories = PatternCategory::classify(&chunk.text);
        if categories.is_empty() {
            continue;
        }
        let key = category_key(&categories);
        groups
            .entry(key)
            .or_insert_with(|| PatternGroup {
                categories,
                examples: Vec::new(),
            })
            .examples
            .push(chunk.text.chars().take(EXCERPT_CHARS).collect());
    }

    let mut created = 0;
    for (key, group) in &groups {
        let n = group.examples.len();
        if n < MIN_INSTANCES || skills.has_skill(key)? {
            continue;
        }
        let record = build_skill(key, group, now);
        skills.add_skill(&record)?;
        debug!(skill = %record.id, instances = n, "skill synthesized");
        created += 1;
    }

    for chunk in &pending {
        chunks.mark_consolidated(&chunk.id)?;
    }

    info!(scanned = pending.len(), groups = groups.len(), created, "skill synthesis pass complete");
    Ok(created)
}

/// `min(0.5 + 0.1 × instances, 0.95)`.
pub fn success_rate(instances: usize) -> f64 {
    (0.5 + 0.1 * instances as f64).min(0.95)
}

fn build_skill(key: &str, group: &PatternGroup, now: DateTime<Utc>) -> SkillRecord {
    let n = group.examples.len();
    let name = group
        .categories
        .iter()
        .map(|c| title_case(c.label()))
        .collect::<Vec<_>>()
        .join(" + ");
    SkillRecord {
        id: key.to_string(),
        name,
        intent: format!("Recurring {key} pattern observed {n} times"),
        steps: group.categories.iter().map(|c| c.step().to_string()).collect(),
        success_rate: success_rate(n),
        last_used: now,
        evidence_count: n,
    }
}

fn title_case(label: &str) -> String {
    label
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
