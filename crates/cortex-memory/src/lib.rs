//! `cortex-memory` – The Knowledge Graph.
//!
//! Gives the agent a persistent, self-consolidating memory of the entities it
//! has met, backed by a JSON snapshot for the graph and local SQLite
//! databases for interaction chunks and synthesized skills.
//!
//! Every graph operation is a plain synchronous function over an explicitly
//! passed [`GraphState`][graph::GraphState]; hosts that share the graph wrap
//! it in a single lock (see `cortex-runtime`).
//!
//! # Modules
//!
//! - [`graph`] – [`GraphState`][graph::GraphState]: entities, relations and
//!   version-based dirty tracking.
//! - [`store`] – entity CRUD with merge-on-duplicate evidence accounting.
//! - [`relations`] – upsert, removal and pruning of typed, weighted edges.
//! - [`search`] – weighted free-text search, neighbor lookup and
//!   breadth-first traversal.
//! - [`consolidation`] – stage promotion and near-duplicate merging.
//! - [`persistence`] – atomic JSON snapshots of the graph.
//! - [`skills`] – pattern mining over interaction chunks into reusable
//!   skills.
//! - [`chunk_store`] / [`skill_store`] – SQLite implementations of the
//!   synthesis collaborators.

pub mod chunk_store;
pub mod consolidation;
pub mod graph;
pub mod persistence;
pub mod relations;
pub mod search;
pub mod skill_store;
pub mod skills;
pub mod store;

pub use graph::{GraphState, GraphStats};
