//! Background maintenance loop.
//!
//! On every tick the loop consolidates the graph when the
//! [`ConsolidationTrigger`][crate::trigger::ConsolidationTrigger] says a pass
//! is due, then flushes it to disk if anything changed.  Setting the shared
//! shutdown flag stops the loop after one final flush.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cortex_memory::consolidation::ConsolidationReport;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::MemoryEngine;

/// Where and how often the maintenance loop runs.
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub interval: Duration,
    pub graph_path: PathBuf,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub consolidation: Option<ConsolidationReport>,
    pub flushed: bool,
}

/// Run one maintenance step synchronously.
pub fn run_maintenance_tick(engine: &MemoryEngine, graph_path: &Path) -> TickOutcome {
    let mut outcome = TickOutcome::default();

    if engine.consolidation_due() {
        outcome.consolidation = Some(engine.consolidate());
    }

    match engine.flush(graph_path) {
        Ok(flushed) => outcome.flushed = flushed,
        Err(e) => warn!(error = %e, "maintenance flush failed"),
    }
    outcome
}

/// Spawn the maintenance loop on the current Tokio runtime.
pub fn spawn_maintenance(
    engine: Arc<MemoryEngine>,
    settings: MaintenanceSettings,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let outcome = run_maintenance_tick(&engine, &settings.graph_path);
            debug!(
                consolidated = outcome.consolidation.is_some(),
                flushed = outcome.flushed,
                "maintenance tick"
            );
        }

        engine.flush_or_log(&settings.graph_path);
        debug!("maintenance loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use cortex_types::EntityType;

    #[test]
    fn tick_consolidates_then_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let mut config = EngineConfig::default();
        config.consolidation_mutation_threshold = 1;
        let engine = MemoryEngine::in_memory(config);
        engine.add_entity("Redis", EntityType::Technology, &["cache"], "explicit");

        let outcome = run_maintenance_tick(&engine, &path);
        assert!(outcome.consolidation.is_some());
        assert!(outcome.flushed);
        assert!(path.exists());

        let idle = run_maintenance_tick(&engine, &path);
        assert_eq!(idle, TickOutcome::default());
    }

    #[tokio::test]
    async fn loop_flushes_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let engine = Arc::new(MemoryEngine::in_memory(EngineConfig::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = spawn_maintenance(
            Arc::clone(&engine),
            MaintenanceSettings {
                interval: Duration::from_millis(10),
                graph_path: path.clone(),
            },
            Arc::clone(&shutdown),
        );

        engine.add_entity("Redis", EntityType::Technology, &["cache"], "explicit");
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.store(true, Ordering::SeqCst);
        handle.await.unwrap();

        assert!(path.exists());
        assert!(!engine.is_dirty());
    }
}
