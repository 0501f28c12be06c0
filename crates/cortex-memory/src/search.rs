//! Search & Traversal – weighted free-text search and multi-hop expansion.
//!
//! # Scoring
//!
//! The query is lowercased and split on whitespace; tokens of two characters
//! or fewer are discarded.  Each entity then accumulates:
//!
//! | signal                                            | score                      |
//! |---------------------------------------------------|----------------------------|
//! | normalized name equals the normalized query       | `+1.0`                     |
//! | otherwise, name and query contain one another     | `+0.7`                     |
//! | per token found in the name                       | `+0.3`                     |
//! | per token, per observation containing it          | `+0.15 × stage_weight`     |
//! | any token found in the type label (once)          | `+0.1`                     |
//!
//! The total is clamped to `1.0`.  Entities scoring above `0.05` are hits; a
//! hit bumps the entity's `access_count` and records the query as its
//! [`AccessContext`].
//!
//! # Traversal
//!
//! [`traverse_graph`] runs a breadth-first expansion over
//! [`get_neighbors`], so expired relations never contribute a hop.
//!
//! # Example
//!
//! ```rust
//! use cortex_memory::graph::GraphState;
//! use cortex_memory::relations::add_relation;
//! use cortex_memory::search::traverse_graph;
//!
//! let mut state = GraphState::new();
//! add_relation(&mut state, "A", "B", "links", 1.0, None);
//! add_relation(&mut state, "B", "C", "links", 1.0, None);
//!
//! let visited = traverse_graph(&state, "A", 2);
//! assert_eq!(visited["c"].distance, 2);
//! ```

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use cortex_types::{AccessContext, Direction, Entity, MemoryStage, normalize_key};
use serde::Serialize;
use tracing::debug;

use crate::graph::GraphState;

/// Result count used when the caller has no preference.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Hop count used when the caller has no preference.
pub const DEFAULT_TRAVERSE_DEPTH: usize = 2;

const EXACT_NAME_SCORE: f64 = 1.0;
const PARTIAL_NAME_SCORE: f64 = 0.7;
const TOKEN_IN_NAME_SCORE: f64 = 0.3;
const TOKEN_IN_OBSERVATION_SCORE: f64 = 0.15;
const TOKEN_IN_TYPE_SCORE: f64 = 0.1;
const MIN_HIT_SCORE: f64 = 0.05;

/// Relative weight of an observation's stage when it matches a query token.
pub fn stage_weight(stage: MemoryStage) -> f64 {
    match stage {
        MemoryStage::Observation => 0.5,
        MemoryStage::Episode => 0.7,
        MemoryStage::Fact => 1.0,
        MemoryStage::Belief => 1.2,
        MemoryStage::Trait => 1.5,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result types
// ─────────────────────────────────────────────────────────────────────────────

/// The far end of a live relation, seen from the queried entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    /// Display name of the other endpoint.
    pub name: String,
    pub relation_type: String,
    pub direction: Direction,
    pub weight: f64,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Snapshot of the entity, taken after its access metadata was updated.
    pub entity: Entity,
    pub score: f64,
    pub neighbors: Vec<Neighbor>,
}

/// An entity reached by [`traverse_graph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraversalNode {
    pub name: String,
    /// Hops from the start entity; the start itself is `0`.
    pub distance: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

/// Rank entities against `query`, returning at most `limit` hits.
pub fn search_graph(state: &mut GraphState, query: &str, limit: usize) -> Vec<SearchHit> {
    search_graph_at(state, query, limit, Utc::now())
}

/// [`search_graph`] with an explicit clock, used for relation expiry and the
/// recorded access time.
pub fn search_graph_at(
    state: &mut GraphState,
    query: &str,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<SearchHit> {
    let normalized_query = normalize_key(query);
    if normalized_query.is_empty() {
        return Vec::new();
    }
    let tokens: Vec<&str> = normalized_query
        .split(' ')
        .filter(|t| t.chars().count() > 2)
        .collect();

    let mut scored: Vec<(String, f64)> = state
        .entities
        .iter()
        .map(|(key, entity)| (key.clone(), score_entity(entity, key, &normalized_query, &tokens)))
        .filter(|(_, score)| *score > MIN_HIT_SCORE)
        .collect();

    if scored.is_empty() {
        debug!(query, "search returned no hits");
        return Vec::new();
    }

    for (key, score) in &scored {
        if let Some(entity) = state.entities.get_mut(key) {
            entity.access_count = entity.access_count.saturating_add(1);
            entity.last_access = Some(AccessContext {
                intent: query.trim().to_string(),
                score: *score,
                accessed_at: now,
            });
        }
    }
    state.mark_dirty();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    debug!(query, hits = scored.len(), "search completed");

    scored
        .into_iter()
        .filter_map(|(key, score)| {
            let entity = state.entities.get(&key)?.clone();
            let neighbors = get_neighbors_at(state, &entity.name, now);
            Some(SearchHit {
                entity,
                score,
                neighbors,
            })
        })
        .collect()
}

fn score_entity(entity: &Entity, key: &str, query: &str, tokens: &[&str]) -> f64 {
    let mut score = 0.0;

    if key == query {
        score += EXACT_NAME_SCORE;
    } else if !key.is_empty() && (key.contains(query) || query.contains(key)) {
        score += PARTIAL_NAME_SCORE;
    }

    let contents: Vec<(String, MemoryStage)> = entity
        .observations
        .iter()
        .map(|obs| (obs.content.to_lowercase(), obs.stage))
        .collect();

    for token in tokens {
        if key.contains(token) {
            score += TOKEN_IN_NAME_SCORE;
        }
        for (content, stage) in &contents {
            if content.contains(token) {
                score += TOKEN_IN_OBSERVATION_SCORE * stage_weight(*stage);
            }
        }
    }

    let type_label = entity.entity_type.as_str();
    if tokens.iter().any(|t| type_label.contains(t)) {
        score += TOKEN_IN_TYPE_SCORE;
    }

    score.min(1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Neighbors
// ─────────────────────────────────────────────────────────────────────────────

/// Live relations touching `name`, heaviest first.
pub fn get_neighbors(state: &GraphState, name: &str) -> Vec<Neighbor> {
    get_neighbors_at(state, name, Utc::now())
}

/// [`get_neighbors`] evaluated against an explicit clock.
///
/// Relations whose other endpoint no longer resolves to an entity are
/// skipped.  A self-loop is reported once, as outgoing.
pub fn get_neighbors_at(state: &GraphState, name: &str, now: DateTime<Utc>) -> Vec<Neighbor> {
    let key = normalize_key(name);
    let mut neighbors: Vec<Neighbor> = state
        .relations
        .iter()
        .filter(|rel| !rel.is_expired_at(now))
        .filter_map(|rel| {
            let (other, direction) = if normalize_key(&rel.from) == key {
                (&rel.to, Direction::Outgoing)
            } else if normalize_key(&rel.to) == key {
                (&rel.from, Direction::Incoming)
            } else {
                return None;
            };
            let other = state.entity(other)?;
            Some(Neighbor {
                name: other.name.clone(),
                relation_type: rel.relation_type.clone(),
                direction,
                weight: rel.weight,
            })
        })
        .collect();
    neighbors.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    neighbors
}

// ─────────────────────────────────────────────────────────────────────────────
// Traversal
// ─────────────────────────────────────────────────────────────────────────────

/// Breadth-first expansion from `start` up to `depth` hops.
///
/// Returns every visited entity keyed by normalized name with its shortest
/// distance.  Empty when `start` does not exist.
pub fn traverse_graph(state: &GraphState, start: &str, depth: usize) -> BTreeMap<String, TraversalNode> {
    traverse_graph_at(state, start, depth, Utc::now())
}

pub fn traverse_graph_at(
    state: &GraphState,
    start: &str,
    depth: usize,
    now: DateTime<Utc>,
) -> BTreeMap<String, TraversalNode> {
    let mut visited = BTreeMap::new();
    let Some(origin) = state.entity(start) else {
        return visited;
    };

    let mut queue = VecDeque::new();
    visited.insert(
        origin.key(),
        TraversalNode {
            name: origin.name.clone(),
            distance: 0,
        },
    );
    queue.push_back((origin.name.clone(), 0));

    while let Some((name, distance)) = queue.pop_front() {
        if distance >= depth {
            continue;
        }
        for neighbor in get_neighbors_at(state, &name, now) {
            let key = normalize_key(&neighbor.name);
            if visited.contains_key(&key) {
                continue;
            }
            visited.insert(
                key,
                TraversalNode {
                    name: neighbor.name.clone(),
                    distance: distance + 1,
                },
            );
            queue.push_back((neighbor.name, distance + 1));
        }
    }
    visited
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
