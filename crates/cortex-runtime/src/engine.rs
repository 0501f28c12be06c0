//! [`MemoryEngine`] – the shared, lock-protected host of a [`GraphState`].
//!
//! All graph operations in `cortex-memory` are synchronous functions over an
//! explicitly passed state.  The engine owns that state behind a single
//! coarse [`parking_lot::Mutex`], so entity/relation invariants always hold
//! across threads, and hands callers owned clones rather than references
//! into the lock.
//!
//! Persistence stays explicit: [`MemoryEngine::flush`] snapshots the graph
//! under the lock, writes it outside the lock, and then records the written
//! version.  A separate writer lock lets only one flush touch the file at a
//! time.  Mutations that land while the file is being written keep the
//! graph dirty.
//!
//! # Example
//!
//! ```rust
//! use cortex_runtime::engine::{EngineConfig, MemoryEngine};
//! use cortex_types::EntityType;
//!
//! let engine = MemoryEngine::in_memory(EngineConfig::default());
//! engine.add_entity("Redis", EntityType::Technology, &["In-memory store"], "explicit");
//!
//! let hits = engine.search("redis", None);
//! assert_eq!(hits[0].entity.name, "Redis");
//! assert_eq!(engine.get_entity("REDIS").unwrap().access_count, 1);
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use cortex_memory::consolidation::{self, ConsolidationReport, PromotionConfig};
use cortex_memory::graph::{GraphState, GraphStats};
use cortex_memory::persistence;
use cortex_memory::relations;
use cortex_memory::search::{
    self, DEFAULT_SEARCH_LIMIT, DEFAULT_TRAVERSE_DEPTH, Neighbor, SearchHit, TraversalNode,
};
use cortex_memory::skills::{self, ChunkSource, SkillStore};
use cortex_memory::store;
use cortex_types::{CortexError, Entity, EntityType, Relation};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::events::{MemoryBus, MemoryEventKind};
use crate::trigger::ConsolidationTrigger;

// ─────────────────────────────────────────────────────────────────────────────
// EngineConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for a [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub promotion: PromotionConfig,
    /// Used by [`MemoryEngine::search`] when no limit is given.
    pub search_limit: usize,
    /// Used by [`MemoryEngine::traverse`] when no depth is given.
    pub traverse_depth: usize,
    /// Mutations since the last pass that make consolidation due.
    pub consolidation_mutation_threshold: u64,
    /// Mean confirmations that make consolidation due.
    pub consolidation_avg_confirmations: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            promotion: PromotionConfig::default(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            traverse_depth: DEFAULT_TRAVERSE_DEPTH,
            consolidation_mutation_threshold: 50,
            consolidation_avg_confirmations: 3.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe host of one knowledge graph.
pub struct MemoryEngine {
    state: Mutex<GraphState>,
    trigger: Mutex<ConsolidationTrigger>,
    /// Serializes snapshot writes; never taken while `state` is held.
    flush_lock: Mutex<()>,
    config: EngineConfig,
    bus: MemoryBus,
}

impl MemoryEngine {
    /// Host an existing graph.
    pub fn new(state: GraphState, config: EngineConfig) -> Self {
        let mut trigger = ConsolidationTrigger::new(
            config.consolidation_mutation_threshold,
            config.consolidation_avg_confirmations,
        );
        trigger.record_pass(state.version());
        Self {
            state: Mutex::new(state),
            trigger: Mutex::new(trigger),
            flush_lock: Mutex::new(()),
            config,
            bus: MemoryBus::default(),
        }
    }

    /// Load the graph at `path`, starting empty if it is missing or corrupt.
    pub fn open(path: &Path, config: EngineConfig) -> Self {
        Self::new(persistence::load_or_empty(path), config)
    }

    /// An empty engine with no backing file.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(GraphState::new(), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    // ── Entity Store ─────────────────────────────────────────────────────────

    pub fn add_entity<S: AsRef<str>>(
        &self,
        name: &str,
        entity_type: EntityType,
        contents: &[S],
        source: &str,
    ) -> Entity {
        let entity = {
            let mut state = self.state.lock();
            store::add_entity(&mut state, name, entity_type, contents, source).clone()
        };
        self.bus.publish(MemoryEventKind::EntityUpserted {
            name: entity.name.clone(),
        });
        entity
    }

    pub fn get_entity(&self, name: &str) -> Option<Entity> {
        store::get_entity(&self.state.lock(), name).cloned()
    }

    /// Like [`get_entity`][Self::get_entity], with a typed not-found error.
    pub fn require_entity(&self, name: &str) -> Result<Entity, CortexError> {
        self.get_entity(name)
            .ok_or_else(|| CortexError::EntityNotFound(name.trim().to_string()))
    }

    pub fn add_observations<S: AsRef<str>>(&self, name: &str, contents: &[S], source: &str) -> bool {
        let added = store::add_observations(&mut self.state.lock(), name, contents, source);
        if added {
            self.bus.publish(MemoryEventKind::ObservationsAdded {
                name: name.trim().to_string(),
                count: contents.len(),
            });
        }
        added
    }

    pub fn update_session_context(&self, name: &str, text: &str) -> Entity {
        let entity = store::update_session_context(&mut self.state.lock(), name, text).clone();
        self.bus.publish(MemoryEventKind::SessionUpdated {
            name: entity.name.clone(),
        });
        entity
    }

    pub fn delete_entity(&self, name: &str) -> bool {
        let deleted = store::delete_entity(&mut self.state.lock(), name);
        if deleted {
            self.bus.publish(MemoryEventKind::EntityDeleted {
                name: name.trim().to_string(),
            });
        }
        deleted
    }

    pub fn remove_observation(&self, name: &str, content: &str) -> bool {
        let removed = store::remove_observation(&mut self.state.lock(), name, content);
        if removed {
            self.bus.publish(MemoryEventKind::ObservationRemoved {
                name: name.trim().to_string(),
            });
        }
        removed
    }

    // ── Relations ────────────────────────────────────────────────────────────

    pub fn add_relation(
        &self,
        from: &str,
        to: &str,
        relation_type: &str,
        weight: f64,
        valid_until: Option<DateTime<Utc>>,
    ) -> Relation {
        let relation = relations::add_relation(
            &mut self.state.lock(),
            from,
            to,
            relation_type,
            weight,
            valid_until,
        )
        .clone();
        self.bus.publish(MemoryEventKind::RelationAdded {
            from: relation.from.clone(),
            to: relation.to.clone(),
            relation_type: relation.relation_type.clone(),
        });
        relation
    }

    pub fn remove_relation(&self, from: &str, to: &str, relation_type: &str) -> bool {
        let removed = relations::remove_relation(&mut self.state.lock(), from, to, relation_type);
        if removed {
            self.bus.publish(MemoryEventKind::RelationRemoved {
                from: from.trim().to_string(),
                to: to.trim().to_string(),
                relation_type: relation_type.trim().to_string(),
            });
        }
        removed
    }

    pub fn prune_expired_relations(&self) -> usize {
        let count = relations::prune_expired_relations(&mut self.state.lock(), Utc::now());
        if count > 0 {
            self.bus.publish(MemoryEventKind::RelationsPruned { count });
        }
        count
    }

    // ── Search & Traversal ───────────────────────────────────────────────────

    /// Ranked search; `limit` defaults to the configured search limit.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Vec<SearchHit> {
        let limit = limit.unwrap_or(self.config.search_limit);
        let hits = search::search_graph(&mut self.state.lock(), query, limit);
        self.bus.publish(MemoryEventKind::Searched {
            query: query.trim().to_string(),
            hits: hits.len(),
        });
        hits
    }

    pub fn neighbors(&self, name: &str) -> Vec<Neighbor> {
        search::get_neighbors(&self.state.lock(), name)
    }

    /// Breadth-first expansion; `depth` defaults to the configured depth.
    pub fn traverse(&self, start: &str, depth: Option<usize>) -> BTreeMap<String, TraversalNode> {
        let depth = depth.unwrap_or(self.config.traverse_depth);
        search::traverse_graph(&self.state.lock(), start, depth)
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// An owned copy of the whole graph.
    pub fn snapshot(&self) -> GraphState {
        self.state.lock().clone()
    }

    pub fn stats(&self) -> GraphStats {
        self.state.lock().stats(Utc::now())
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().is_dirty()
    }

    // ── Consolidation & synthesis ────────────────────────────────────────────

    /// `true` when the [`ConsolidationTrigger`] says a pass is due.
    pub fn consolidation_due(&self) -> bool {
        let state = self.state.lock();
        self.trigger.lock().should_run(&state)
    }

    /// Run one consolidation pass now.
    pub fn consolidate(&self) -> ConsolidationReport {
        let report = {
            let mut state = self.state.lock();
            let report = consolidation::consolidate(&mut state, &self.config.promotion, Utc::now());
            self.trigger.lock().record_pass(state.version());
            report
        };
        self.bus.publish(MemoryEventKind::Consolidated {
            merges: report.merges,
            promotions: report.total_promotions(),
        });
        report
    }

    /// Mine `chunks` for recurring patterns and store new skills in `skills`.
    pub fn synthesize_skills(
        &self,
        chunks: &dyn ChunkSource,
        skills: &dyn SkillStore,
    ) -> Result<usize, CortexError> {
        let created = skills::synthesize_skills(chunks, skills, Utc::now())
            .map_err(|e| CortexError::SkillStore(e.to_string()))?;
        if created > 0 {
            self.bus.publish(MemoryEventKind::SkillsSynthesized { created });
        }
        Ok(created)
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Write the graph to `path` if it has unsaved mutations.
    ///
    /// Returns `true` when a snapshot was written.
    ///
    /// Concurrent flushes run one at a time; graph operations keep running
    /// while the file is written.
    pub fn flush(&self, path: &Path) -> Result<bool, CortexError> {
        let _writer = self.flush_lock.lock();
        let (snapshot, version) = {
            let state = self.state.lock();
            if !state.is_dirty() {
                return Ok(false);
            }
            (state.clone(), state.version())
        };

        persistence::write_snapshot(&snapshot, path)
            .map_err(|e| CortexError::Persistence(e.to_string()))?;
        self.state.lock().mark_persisted(version);

        debug!(path = %path.display(), version, "graph flushed");
        self.bus.publish(MemoryEventKind::Flushed { version });
        Ok(true)
    }

    /// Flush and log the outcome; used on shutdown paths that cannot
    /// propagate errors.
    pub fn flush_or_log(&self, path: &Path) {
        match self.flush(path) {
            Ok(true) => info!(path = %path.display(), "graph saved"),
            Ok(false) => {}
            Err(e) => error!(error = %e, "failed to save graph"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
