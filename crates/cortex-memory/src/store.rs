//! Entity Store – CRUD over entities and their observations.
//!
//! Every operation takes the [`GraphState`] explicitly.  Writes follow
//! merge-on-duplicate semantics: asserting content an entity already holds
//! (compared case- and trim-insensitively) reinforces the existing
//! observation's [`Evidence`][cortex_types::Evidence] instead of appending a
//! second copy.
//!
//! The only reported failure is "entity not found", surfaced as `false` or
//! `None`.  Content is opaque text and is never validated.
//!
//! # Example
//!
//! ```rust
//! use cortex_memory::graph::GraphState;
//! use cortex_memory::store::{add_entity, get_entity};
//! use cortex_types::EntityType;
//!
//! let mut state = GraphState::new();
//! add_entity(&mut state, "Redis", EntityType::Technology, &["In-memory store"], "explicit");
//! add_entity(&mut state, "redis", EntityType::Technology, &["in-memory store"], "extracted");
//!
//! let redis = get_entity(&state, "REDIS").unwrap();
//! assert_eq!(redis.observations.len(), 1);
//! assert_eq!(redis.observations[0].evidence.confirmations, 2);
//! ```

use chrono::{DateTime, Utc};
use cortex_types::{Entity, EntityType, Observation, normalize_key};
use tracing::debug;

use crate::graph::GraphState;

/// Prefix marking the single ephemeral session-summary observation.
pub const SESSION_TAG: &str = "[session]";

/// Provenance label attached to session summaries.
pub const SESSION_SOURCE: &str = "session";

// ─────────────────────────────────────────────────────────────────────────────
// Public operations
// ─────────────────────────────────────────────────────────────────────────────

/// Find or create the entity `name` and merge `contents` into it.
///
/// A brand-new entity takes `entity_type`.  An existing entity of type
/// [`EntityType::Other`] is upgraded to a more specific `entity_type`; no
/// other type change is ever applied.
pub fn add_entity<'a, S: AsRef<str>>(
    state: &'a mut GraphState,
    name: &str,
    entity_type: EntityType,
    contents: &[S],
    source: &str,
) -> &'a Entity {
    let now = Utc::now();
    state.mark_dirty();

    let entity = state
        .entities
        .entry(normalize_key(name))
        .or_insert_with(|| {
            debug!(entity = %name.trim(), %entity_type, "creating entity");
            Entity::new(name.trim(), entity_type, now)
        });

    if !entity.entity_type.is_specific() && entity_type.is_specific() {
        debug!(entity = %entity.name, from = %entity.entity_type, to = %entity_type, "upgrading entity type");
        entity.entity_type = entity_type;
    }

    merge_contents(entity, contents, source, now);
    entity.updated_at = now;
    entity
}

/// Exact case-insensitive lookup.  Never touches access metadata.
pub fn get_entity<'a>(state: &'a GraphState, name: &str) -> Option<&'a Entity> {
    state.entity(name)
}

/// Merge `contents` into an existing entity.
///
/// Returns `false`, without creating anything, when `name` is unknown.
pub fn add_observations<S: AsRef<str>>(
    state: &mut GraphState,
    name: &str,
    contents: &[S],
    source: &str,
) -> bool {
    let now = Utc::now();
    let Some(entity) = state.entity_mut(name) else {
        debug!(entity = %name, "add_observations on unknown entity");
        return false;
    };
    merge_contents(entity, contents, source, now);
    entity.updated_at = now;
    state.mark_dirty();
    true
}

/// Replace the entity's session summary with `text`.
///
/// Any observation tagged with [`SESSION_TAG`] is dropped and a fresh one is
/// appended, so an entity holds at most one session summary.  A missing
/// entity is created as [`EntityType::Person`].
pub fn update_session_context<'a>(state: &'a mut GraphState, name: &str, text: &str) -> &'a Entity {
    let now = Utc::now();
    state.mark_dirty();

    let entity = state
        .entities
        .entry(normalize_key(name))
        .or_insert_with(|| Entity::new(name.trim(), EntityType::Person, now));

    entity.observations.retain(|obs| !is_session_summary(obs));
    entity.observations.push(Observation::new(
        format!("{SESSION_TAG} {}", text.trim()),
        SESSION_SOURCE,
        now,
    ));
    entity.updated_at = now;
    entity
}

/// Remove the entity and every relation touching it.
///
/// Returns `true` when an entity or at least one relation was removed.
pub fn delete_entity(state: &mut GraphState, name: &str) -> bool {
    let key = normalize_key(name);
    let removed_entity = state.entities.remove(&key).is_some();

    let before = state.relations.len();
    state.relations.retain(|rel| !rel.touches(&key));
    let removed_relations = before - state.relations.len();

    let changed = removed_entity || removed_relations > 0;
    if changed {
        debug!(entity = %name, removed_relations, "deleted entity");
        state.mark_dirty();
    }
    changed
}

/// Remove the observation of `name` whose content matches `content`.
///
/// Returns `false` when either the entity or the observation is missing.
pub fn remove_observation(state: &mut GraphState, name: &str, content: &str) -> bool {
    let Some(entity) = state.entity_mut(name) else {
        return false;
    };
    let before = entity.observations.len();
    entity.observations.retain(|obs| !obs.has_content(content));
    if entity.observations.len() == before {
        return false;
    }
    entity.updated_at = Utc::now();
    state.mark_dirty();
    true
}

/// `true` when `obs` is the session summary written by
/// [`update_session_context`].
///
/// Both the tag and the `session` source must match; a user fact that merely
/// starts with the tag is an ordinary observation.
pub fn is_session_summary(obs: &Observation) -> bool {
    obs.source == SESSION_SOURCE && obs.content.trim_start().starts_with(SESSION_TAG)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn merge_contents<S: AsRef<str>>(
    entity: &mut Entity,
    contents: &[S],
    source: &str,
    now: DateTime<Utc>,
) {
    for content in contents {
        let content = content.as_ref();
        // The session summary never absorbs asserted facts.
        match entity
            .observations
            .iter_mut()
            .find(|obs| !is_session_summary(obs) && obs.has_content(content))
        {
            Some(existing) => existing.evidence.reinforce(source, now),
            None => entity
                .observations
                .push(Observation::new(content, source, now)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
