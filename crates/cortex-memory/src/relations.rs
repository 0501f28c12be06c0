//! Relations – directed, typed, weighted edges between entities.
//!
//! An edge is identified by its normalized endpoints plus its type, so
//! re-adding `Alice -works_at-> Acme` updates the existing edge rather than
//! adding a parallel one.  Expired edges stay in the list until
//! [`prune_expired_relations`] removes them; readers filter them out lazily.

use chrono::{DateTime, Utc};
use cortex_types::{Entity, EntityType, Relation, normalize_key};
use tracing::debug;

use crate::graph::GraphState;

/// Weight used when the caller does not supply one.
pub const DEFAULT_RELATION_WEIGHT: f64 = 1.0;

/// Insert or update the edge `from -relation_type-> to`.
///
/// Missing endpoints are created as [`EntityType::Other`] so every stored
/// edge resolves on both sides at the time it is written.
pub fn add_relation<'a>(
    state: &'a mut GraphState,
    from: &str,
    to: &str,
    relation_type: &str,
    weight: f64,
    valid_until: Option<DateTime<Utc>>,
) -> &'a Relation {
    let now = Utc::now();
    state.mark_dirty();

    for endpoint in [from, to] {
        state
            .entities
            .entry(normalize_key(endpoint))
            .or_insert_with(|| {
                debug!(entity = %endpoint.trim(), "creating relation endpoint");
                Entity::new(endpoint.trim(), EntityType::Other, now)
            });
    }

    let relation_type = relation_type.trim();
    let idx = match find_relation(state, from, to, relation_type) {
        Some(idx) => {
            let existing = &mut state.relations[idx];
            existing.weight = weight;
            existing.valid_until = valid_until;
            idx
        }
        None => {
            debug!(from = %from.trim(), to = %to.trim(), relation_type, "adding relation");
            state.relations.push(Relation {
                from: from.trim().to_string(),
                to: to.trim().to_string(),
                relation_type: relation_type.to_string(),
                weight,
                valid_until,
            });
            state.relations.len() - 1
        }
    };
    &state.relations[idx]
}

/// Remove the edge `from -relation_type-> to`.  Returns `false` when no such
/// edge exists.
pub fn remove_relation(state: &mut GraphState, from: &str, to: &str, relation_type: &str) -> bool {
    match find_relation(state, from, to, relation_type.trim()) {
        Some(idx) => {
            state.relations.remove(idx);
            state.mark_dirty();
            true
        }
        None => false,
    }
}

/// Drop every relation whose `valid_until` is at or before `now`.
///
/// Returns the number of relations removed.
pub fn prune_expired_relations(state: &mut GraphState, now: DateTime<Utc>) -> usize {
    let before = state.relations.len();
    state.relations.retain(|rel| !rel.is_expired_at(now));
    let removed = before - state.relations.len();
    if removed > 0 {
        debug!(removed, "pruned expired relations");
        state.mark_dirty();
    }
    removed
}

fn find_relation(state: &GraphState, from: &str, to: &str, relation_type: &str) -> Option<usize> {
    let from_key = normalize_key(from);
    let to_key = normalize_key(to);
    state.relations.iter().position(|rel| {
        normalize_key(&rel.from) == from_key
            && normalize_key(&rel.to) == to_key
            && rel.relation_type.eq_ignore_ascii_case(relation_type)
    })
}
