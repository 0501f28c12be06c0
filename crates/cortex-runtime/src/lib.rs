//! `cortex-runtime` – hosting the knowledge graph.
//!
//! Wraps the synchronous graph operations of `cortex-memory` in a shareable
//! engine and keeps the graph healthy in the background.
//!
//! # Modules
//!
//! - [`engine`] – [`MemoryEngine`][engine::MemoryEngine]: owns the
//!   [`GraphState`][cortex_memory::GraphState] behind a single
//!   `parking_lot::Mutex`, returns owned results, and flushes snapshots on
//!   demand.
//! - [`trigger`] – [`ConsolidationTrigger`][trigger::ConsolidationTrigger]:
//!   decides when a consolidation pass is due from mutation volume and mean
//!   confirmation counts.
//! - [`maintenance`] – [`spawn_maintenance`][maintenance::spawn_maintenance]:
//!   a Tokio interval task that consolidates and flushes until shut down.
//! - [`events`] – [`MemoryBus`][events::MemoryBus]: broadcast of every graph
//!   mutation as a [`MemoryEvent`][events::MemoryEvent].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod engine;
pub mod events;
pub mod maintenance;
pub mod telemetry;
pub mod trigger;

pub use engine::{EngineConfig, MemoryEngine};
pub use events::{MemoryBus, MemoryEvent, MemoryEventKind, MemorySubscriber};
pub use maintenance::{MaintenanceSettings, TickOutcome, run_maintenance_tick, spawn_maintenance};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use trigger::ConsolidationTrigger;
