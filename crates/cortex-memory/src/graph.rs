//! Graph State – the aggregate root of the knowledge graph.
//!
//! A [`GraphState`] owns every [`Entity`] (keyed by its normalized name) and
//! the flat list of [`Relation`]s between them.  It is a plain owned value:
//! writers take `&mut GraphState`, readers take `&GraphState`, and hosts that
//! share it across threads wrap the whole structure in a single lock.
//!
//! # Dirty tracking
//!
//! Every mutating operation bumps a monotonically increasing `version`.  The
//! persistence layer records the version it last wrote with
//! [`GraphState::mark_persisted`]; the state is dirty whenever the two differ.
//! Neither counter is serialized, so a freshly loaded graph starts clean.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cortex_types::{Entity, MemoryStage, Relation, normalize_key};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// GraphState
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory store of entities and relations plus mutation tracking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphState {
    #[serde(default)]
    pub(crate) entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub(crate) relations: Vec<Relation>,
    #[serde(skip)]
    version: u64,
    #[serde(skip)]
    persisted_version: u64,
}

impl GraphState {
    /// Create an empty, clean graph.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Read access ──────────────────────────────────────────────────────────

    /// Case-insensitive lookup by display name.
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(&normalize_key(name))
    }

    pub(crate) fn entity_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.entities.get_mut(&normalize_key(name))
    }

    /// All entities in normalized-key order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// All relations, including expired ones, in insertion order.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    // ── Dirty tracking ───────────────────────────────────────────────────────

    /// Current mutation version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// `true` when mutations happened since the last persisted version.
    pub fn is_dirty(&self) -> bool {
        self.version != self.persisted_version
    }

    /// Record that the snapshot taken at `version` has been written out.
    ///
    /// Versions older than the last persisted one are ignored, so a slow
    /// writer cannot mark newer mutations as saved.
    pub fn mark_persisted(&mut self, version: u64) {
        if version > self.persisted_version {
            self.persisted_version = version.min(self.version);
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    // ── Statistics ───────────────────────────────────────────────────────────

    /// Summary counts used by status displays and maintenance heuristics.
    pub fn stats(&self, now: DateTime<Utc>) -> GraphStats {
        let mut by_stage = BTreeMap::new();
        let mut observations = 0;
        for entity in self.entities.values() {
            for obs in &entity.observations {
                observations += 1;
                *by_stage.entry(obs.stage).or_insert(0) += 1;
            }
        }
        GraphStats {
            entities: self.entities.len(),
            relations: self.relations.len(),
            expired_relations: self
                .relations
                .iter()
                .filter(|r| r.is_expired_at(now))
                .count(),
            observations,
            by_stage,
            version: self.version,
            dirty: self.is_dirty(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GraphStats
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time summary of a [`GraphState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relations: usize,
    /// Relations past their `valid_until` that are still stored.
    pub expired_relations: usize,
    pub observations: usize,
    /// Observation count per lifecycle stage; stages with no observations are
    /// absent.
    pub by_stage: BTreeMap<MemoryStage, usize>,
    pub version: u64,
    pub dirty: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
