//! `cortex-cli` – Cortex Command Line Interface
//!
//! An interactive shell over a persistent knowledge graph.  It:
//!
//! 1. Checks for `~/.cortex/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Loads the graph snapshot and opens the chunk and skill databases.
//! 3. Starts the background maintenance loop (consolidate + flush).
//! 4. Drops the user into an **interactive REPL** with slash-commands.
//! 5. Intercepts **Ctrl-C** to save the graph before exiting.

mod config;
mod repl;

use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use cortex_memory::chunk_store::SqliteChunkStore;
use cortex_memory::skill_store::SqliteSkillStore;
use cortex_runtime::{MaintenanceSettings, MemoryEngine, spawn_maintenance};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters, CORTEX_LOG_FORMAT=json switches to JSON lines, and
    // OTEL_EXPORTER_OTLP_ENDPOINT enables span export.  User-facing output
    // still uses println!.
    let _telemetry = cortex_runtime::init_tracing("cortex");

    print_banner();

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Memory ────────────────────────────────────────────────────────────
    let engine = Arc::new(MemoryEngine::open(&cfg.graph_path, cfg.engine_config()));
    let stats = engine.stats();
    println!(
        "  Graph {} ({} entities, {} relations)",
        cfg.graph_path.display().to_string().bold(),
        stats.entities,
        stats.relations
    );

    let chunks = open_store("chunk", &cfg.chunk_db_path, SqliteChunkStore::open);
    let skills = open_store("skill", &cfg.skill_db_path, SqliteSkillStore::open);

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let engine_ctrlc = Arc::clone(&engine);
    let shutdown_ctrlc = Arc::clone(&shutdown);
    let graph_path_ctrlc = cfg.graph_path.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – saving memory …".yellow().bold());
        shutdown_ctrlc.store(true, Ordering::SeqCst);
        engine_ctrlc.flush_or_log(&graph_path_ctrlc);
        println!("{}", "  ✓ Exiting Cortex.".green());
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; memory is only saved on /quit");
    }

    // ── Background maintenance ────────────────────────────────────────────
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => Some(rt),
        Err(e) => {
            warn!(error = %e, "Failed to start Tokio runtime; background maintenance disabled");
            None
        }
    };
    let maintenance = runtime.as_ref().map(|rt| {
        let _guard = rt.enter();
        spawn_maintenance(
            Arc::clone(&engine),
            MaintenanceSettings {
                interval: Duration::from_secs(cfg.maintenance_interval_secs.max(1)),
                graph_path: cfg.graph_path.clone(),
            },
            Arc::clone(&shutdown),
        )
    });

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let session = repl::Session {
        engine: Arc::clone(&engine),
        chunks,
        skills,
        graph_path: cfg.graph_path.clone(),
    };
    repl::run(&session, Arc::clone(&shutdown));

    shutdown.store(true, Ordering::SeqCst);
    if let Some(rt) = runtime {
        // The loop only notices the flag on its next tick.
        if let Some(handle) = maintenance {
            handle.abort();
        }
        rt.shutdown_timeout(Duration::from_secs(1));
    }
    engine.flush_or_log(&cfg.graph_path);
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Cortex First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Cortex.\n");

    let mut cfg = config::Config::default();

    let graph_path = prompt_line(
        &format!("  Graph file [{}]: ", cfg.graph_path.display()),
        &cfg.graph_path.display().to_string(),
    );
    cfg.graph_path = graph_path.into();

    let limit = prompt_line(
        &format!("  Search results per query [{}]: ", cfg.search_limit),
        &cfg.search_limit.to_string(),
    );
    if let Ok(n) = limit.trim().parse::<usize>() {
        cfg.search_limit = n;
    }

    let interval = prompt_line(
        &format!("  Maintenance interval in seconds [{}]: ", cfg.maintenance_interval_secs),
        &cfg.maintenance_interval_secs.to_string(),
    );
    if let Ok(secs) = interval.trim().parse::<u64>() {
        cfg.maintenance_interval_secs = secs;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______           __           "#.bold().cyan());
    println!("{}", r#"  / ____/___  _____/ /____  _  __"#.bold().cyan());
    println!("{}", r#" / /   / __ \/ ___/ __/ _ \| |/_/"#.bold().cyan());
    println!("{}", r#"/ /___/ /_/ / /  / /_/  __/>  <  "#.bold().cyan());
    println!("{}", r#"\____/\____/_/   \__/\___/_/|_|  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Cortex".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Persistent knowledge-graph memory");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Open a SQLite-backed store, creating its directory first.  Failures are
/// reported and leave the store unavailable for this session.
fn open_store<T, E: std::fmt::Display>(
    label: &str,
    path: &Path,
    open: impl FnOnce(&str) -> Result<T, E>,
) -> Option<T> {
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(error = %e, path = %parent.display(), "Failed to create {} store directory", label);
        return None;
    }
    match open(&path.to_string_lossy()) {
        Ok(store) => Some(store),
        Err(e) => {
            println!("{} {} store at {}: {}", "Could not open".red(), label, path.display(), e);
            None
        }
    }
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
