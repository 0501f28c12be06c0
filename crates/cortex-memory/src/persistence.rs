//! JSON persistence for [`GraphState`].
//!
//! The graph is stored as a single JSON document:
//!
//! ```json
//! {
//!   "entities": { "redis": { "name": "Redis", "type": "technology", ... } },
//!   "relations": [ { "from": "Alice", "to": "Redis", "type": "maintains", "weight": 1.0 } ]
//! }
//! ```
//!
//! Writes go to a sibling temporary file which is then renamed over the
//! target, so a crash mid-write leaves the previous snapshot intact.  A
//! missing file loads as an empty graph; so does a corrupt one, with a
//! warning.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::GraphState;

/// Errors that can arise while reading or writing a graph snapshot.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize `state` to `path` without touching its dirty tracking.
///
/// Parent directories are created as needed.
pub fn write_snapshot(state: &GraphState, path: &Path) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(state)?;
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = json.len(), "graph snapshot written");
    Ok(())
}

/// Write `state` to `path` and mark the written version as persisted.
pub fn save(state: &mut GraphState, path: &Path) -> Result<(), PersistError> {
    let version = state.version();
    write_snapshot(state, path)?;
    state.mark_persisted(version);
    Ok(())
}

/// Read a snapshot, surfacing every failure.
pub fn load(path: &Path) -> Result<GraphState, PersistError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read a snapshot, falling back to an empty graph when the file is missing
/// or unreadable.
pub fn load_or_empty(path: &Path) -> GraphState {
    match load(path) {
        Ok(state) => {
            debug!(path = %path.display(), entities = state.entity_count(), "graph loaded");
            state
        }
        Err(PersistError::Io(e)) if e.kind() == io::ErrorKind::NotFound => GraphState::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not load graph, starting empty");
            GraphState::new()
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "graph.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::add_relation;
    use crate::store::add_entity;
    use cortex_types::EntityType;

    #[test]
    fn save_then_load_preserves_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.json");

        let mut state = GraphState::new();
        add_entity(&mut state, "Redis", EntityType::Technology, &["cache"], "explicit");
        add_relation(&mut state, "Alice", "Redis", "maintains", 0.8, None);
        assert!(state.is_dirty());

        save(&mut state, &path).unwrap();
        assert!(!state.is_dirty());
        assert!(!temp_path(&path).exists());

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.entity_count(), 2);
        assert_eq!(loaded.relation_count(), 1);
        assert_eq!(loaded.entity("redis").unwrap().observations[0].content, "cache");
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn snapshot_keys_entities_by_normalized_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let mut state = GraphState::new();
        add_entity(&mut state, "Open  AI", EntityType::Organization, &["vendor"], "explicit");
        save(&mut state, &path).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["entities"]["open ai"]["name"], "Open  AI");
        assert_eq!(raw["entities"]["open ai"]["type"], "organization");
        assert!(raw["relations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = load_or_empty(&dir.path().join("absent.json"));
        assert!(state.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(load(&path), Err(PersistError::Json(_))));
        assert!(load_or_empty(&path).is_empty());
    }

    #[test]
    fn write_snapshot_leaves_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = GraphState::new();
        add_entity(&mut state, "X", EntityType::Concept, &["x"], "explicit");
        write_snapshot(&state, &dir.path().join("g.json")).unwrap();
        assert!(state.is_dirty());
    }
}
