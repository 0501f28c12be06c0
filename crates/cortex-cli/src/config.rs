//! Configuration Vault – reads/writes `~/.cortex/config.toml`.

use cortex_memory::consolidation::PromotionConfig;
use cortex_memory::search::{DEFAULT_SEARCH_LIMIT, DEFAULT_TRAVERSE_DEPTH};
use cortex_runtime::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.cortex/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON snapshot of the knowledge graph.
    #[serde(default = "default_graph_path")]
    pub graph_path: PathBuf,

    /// SQLite database holding raw interaction chunks.
    #[serde(default = "default_chunk_db_path")]
    pub chunk_db_path: PathBuf,

    /// SQLite database holding synthesized skills.
    #[serde(default = "default_skill_db_path")]
    pub skill_db_path: PathBuf,

    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    #[serde(default = "default_traverse_depth")]
    pub traverse_depth: usize,

    /// Seconds between background consolidate-and-flush passes.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    #[serde(default = "default_mutation_threshold")]
    pub consolidation_mutation_threshold: u64,

    #[serde(default = "default_avg_confirmations")]
    pub consolidation_avg_confirmations: f64,

    /// Stage transition thresholds.
    #[serde(default)]
    pub promotion: PromotionConfig,
}

fn default_graph_path() -> PathBuf {
    cortex_dir().join("graph.json")
}
fn default_chunk_db_path() -> PathBuf {
    cortex_dir().join("chunks.db")
}
fn default_skill_db_path() -> PathBuf {
    cortex_dir().join("skills.db")
}
fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}
fn default_traverse_depth() -> usize {
    DEFAULT_TRAVERSE_DEPTH
}
fn default_maintenance_interval_secs() -> u64 {
    60
}
fn default_mutation_threshold() -> u64 {
    EngineConfig::default().consolidation_mutation_threshold
}
fn default_avg_confirmations() -> f64 {
    EngineConfig::default().consolidation_avg_confirmations
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph_path: default_graph_path(),
            chunk_db_path: default_chunk_db_path(),
            skill_db_path: default_skill_db_path(),
            search_limit: default_search_limit(),
            traverse_depth: default_traverse_depth(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            consolidation_mutation_threshold: default_mutation_threshold(),
            consolidation_avg_confirmations: default_avg_confirmations(),
            promotion: PromotionConfig::default(),
        }
    }
}

impl Config {
    /// The engine tuning derived from this config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            promotion: self.promotion.clone(),
            search_limit: self.search_limit,
            traverse_depth: self.traverse_depth,
            consolidation_mutation_threshold: self.consolidation_mutation_threshold,
            consolidation_avg_confirmations: self.consolidation_avg_confirmations,
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// `~/.cortex`, the default home of every Cortex data file.
pub fn cortex_dir() -> PathBuf {
    PathBuf::from(home_dir()).join(".cortex")
}

/// Return the path to `~/.cortex/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cortex").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CORTEX_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CORTEX_GRAPH_PATH` | `graph_path` |
/// | `CORTEX_SEARCH_LIMIT` | `search_limit` |
/// | `CORTEX_TRAVERSE_DEPTH` | `traverse_depth` |
/// | `CORTEX_MAINTENANCE_INTERVAL_SECS` | `maintenance_interval_secs` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CORTEX_GRAPH_PATH") {
        cfg.graph_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("CORTEX_SEARCH_LIMIT")
        && let Ok(limit) = v.parse::<usize>()
    {
        cfg.search_limit = limit;
    }
    if let Ok(v) = std::env::var("CORTEX_TRAVERSE_DEPTH")
        && let Ok(depth) = v.parse::<usize>()
    {
        cfg.traverse_depth = depth;
    }
    if let Ok(v) = std::env::var("CORTEX_MAINTENANCE_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.maintenance_interval_secs = secs;
    }
}

/// Save the config to disk, creating `~/.cortex/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_customised_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.chunk_db_path = dir.path().join("c.db");
        cfg.traverse_depth = 4;
        cfg.promotion.fact_to_belief.min_confirmations = 9;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.chunk_db_path, dir.path().join("c.db"));
        assert_eq!(loaded.traverse_depth, 4);
        assert_eq!(loaded.promotion.fact_to_belief.min_confirmations, 9);
        assert_eq!(loaded.promotion.episode_to_fact, PromotionConfig::default().episode_to_fact);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "maintenance_interval_secs = 5\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.maintenance_interval_secs, 5);
        assert_eq!(loaded.consolidation_mutation_threshold, 50);
        assert_eq!(loaded.promotion, PromotionConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "search_limit = \"many\"\n").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn engine_config_mirrors_fields() {
        let mut cfg = Config::default();
        cfg.search_limit = 12;
        cfg.consolidation_avg_confirmations = 1.5;
        let engine = cfg.engine_config();
        assert_eq!(engine.search_limit, 12);
        assert_eq!(engine.consolidation_avg_confirmations, 1.5);
        assert_eq!(engine.traverse_depth, DEFAULT_TRAVERSE_DEPTH);
    }

    #[test]
    fn config_path_points_to_cortex_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.cortex/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_graph_path() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("CORTEX_GRAPH_PATH", "/tmp/elsewhere.json") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.graph_path, PathBuf::from("/tmp/elsewhere.json"));
        unsafe { std::env::remove_var("CORTEX_GRAPH_PATH") };
    }

    #[test]
    fn apply_env_overrides_changes_search_limit() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("CORTEX_SEARCH_LIMIT", "9") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.search_limit, 9);
        unsafe { std::env::remove_var("CORTEX_SEARCH_LIMIT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_depth() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("CORTEX_TRAVERSE_DEPTH", "deep") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.traverse_depth, DEFAULT_TRAVERSE_DEPTH);
        unsafe { std::env::remove_var("CORTEX_TRAVERSE_DEPTH") };
    }
}
