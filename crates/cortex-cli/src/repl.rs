//! REPL – Read-Eval-Print Loop for the Cortex interactive shell.
//!
//! Multi-argument commands separate their fields with `|`; fact lists are
//! separated with `;`.  Type `/help` for the full list.

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cortex_memory::chunk_store::SqliteChunkStore;
use cortex_memory::relations::DEFAULT_RELATION_WEIGHT;
use cortex_memory::skill_store::SqliteSkillStore;
use cortex_runtime::MemoryEngine;
use cortex_types::{Direction, Entity, EntityType};

/// Source recorded for facts typed at the prompt.
const REPL_SOURCE: &str = "explicit";

/// Everything the REPL operates on.
pub struct Session {
    pub engine: Arc<MemoryEngine>,
    /// `None` when the chunk database could not be opened.
    pub chunks: Option<SqliteChunkStore>,
    /// `None` when the skill database could not be opened.
    pub skills: Option<SqliteSkillStore>,
    pub graph_path: PathBuf,
}

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Add {
        name: String,
        entity_type: EntityType,
        facts: Vec<String>,
    },
    Observe {
        name: String,
        facts: Vec<String>,
    },
    Forget {
        name: String,
        fact: String,
    },
    Session {
        name: String,
        text: String,
    },
    Get(String),
    Delete(String),
    Relate {
        from: String,
        relation_type: String,
        to: String,
        weight: f64,
    },
    Unrelate {
        from: String,
        relation_type: String,
        to: String,
    },
    Prune,
    Search(String),
    Neighbors(String),
    Traverse {
        start: String,
        depth: Option<usize>,
    },
    Consolidate,
    Chunk(String),
    Synthesize,
    Skills,
    Stats,
    Save,
    Quit,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: &Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "cortex>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => execute(session, cmd),
            Err(msg) => println!("{}", msg.red()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse one input line into a [`Command`].
///
/// The error is a user-facing usage or unknown-command message.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head {
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        "/prune" => Ok(Command::Prune),
        "/consolidate" => Ok(Command::Consolidate),
        "/synthesize" => Ok(Command::Synthesize),
        "/skills" => Ok(Command::Skills),
        "/stats" => Ok(Command::Stats),
        "/save" => Ok(Command::Save),

        "/add" => match split_fields(rest).as_slice() {
            [name, ty, facts] if !name.is_empty() => Ok(Command::Add {
                name: name.clone(),
                entity_type: EntityType::from_label(ty),
                facts: split_facts(facts),
            }),
            [name, ty] if !name.is_empty() => Ok(Command::Add {
                name: name.clone(),
                entity_type: EntityType::from_label(ty),
                facts: Vec::new(),
            }),
            _ => Err(usage("/add <name> | <type> [| <fact>[; <fact>...]]")),
        },
        "/observe" => match split_fields(rest).as_slice() {
            [name, facts] if !name.is_empty() && !split_facts(facts).is_empty() => {
                Ok(Command::Observe {
                    name: name.clone(),
                    facts: split_facts(facts),
                })
            }
            _ => Err(usage("/observe <name> | <fact>[; <fact>...]")),
        },
        "/forget" => match split_fields(rest).as_slice() {
            [name, fact] if !name.is_empty() && !fact.is_empty() => Ok(Command::Forget {
                name: name.clone(),
                fact: fact.clone(),
            }),
            _ => Err(usage("/forget <name> | <fact>")),
        },
        "/session" => match split_fields(rest).as_slice() {
            [name, text] if !name.is_empty() => Ok(Command::Session {
                name: name.clone(),
                text: text.clone(),
            }),
            _ => Err(usage("/session <name> | <summary>")),
        },
        "/relate" => match split_fields(rest).as_slice() {
            [from, ty, to] if all_present(&[from, ty, to]) => Ok(Command::Relate {
                from: from.clone(),
                relation_type: ty.clone(),
                to: to.clone(),
                weight: DEFAULT_RELATION_WEIGHT,
            }),
            [from, ty, to, weight] if all_present(&[from, ty, to]) => weight
                .parse::<f64>()
                .map(|weight| Command::Relate {
                    from: from.clone(),
                    relation_type: ty.clone(),
                    to: to.clone(),
                    weight,
                })
                .map_err(|_| format!("'{}' is not a valid weight", weight)),
            _ => Err(usage("/relate <from> | <type> | <to> [| <weight>]")),
        },
        "/unrelate" => match split_fields(rest).as_slice() {
            [from, ty, to] if all_present(&[from, ty, to]) => Ok(Command::Unrelate {
                from: from.clone(),
                relation_type: ty.clone(),
                to: to.clone(),
            }),
            _ => Err(usage("/unrelate <from> | <type> | <to>")),
        },
        "/get" => single_arg(rest, "/get <name>").map(Command::Get),
        "/delete" => single_arg(rest, "/delete <name>").map(Command::Delete),
        "/search" => single_arg(rest, "/search <query>").map(Command::Search),
        "/neighbors" => single_arg(rest, "/neighbors <name>").map(Command::Neighbors),
        "/chunk" => single_arg(rest, "/chunk <text>").map(Command::Chunk),
        "/traverse" => {
            let start = single_arg(rest, "/traverse <name> [depth]")?;
            // A trailing number is the depth unless it is the whole name.
            if let Some((name, depth)) = start.rsplit_once(char::is_whitespace)
                && let Ok(depth) = depth.parse::<usize>()
            {
                return Ok(Command::Traverse {
                    start: name.trim().to_string(),
                    depth: Some(depth),
                });
            }
            Ok(Command::Traverse { start, depth: None })
        }
        other => Err(format!(
            "Unknown command: '{}'. Type /help for available commands.",
            other
        )),
    }
}

fn split_fields(rest: &str) -> Vec<String> {
    if rest.is_empty() {
        return Vec::new();
    }
    rest.split('|').map(|f| f.trim().to_string()).collect()
}

fn split_facts(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn all_present(fields: &[&String]) -> bool {
    fields.iter().all(|f| !f.is_empty())
}

fn single_arg(rest: &str, usage_line: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(usage(usage_line))
    } else {
        Ok(rest.to_string())
    }
}

fn usage(line: &str) -> String {
    format!("Usage: {}", line)
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn execute(session: &Session, cmd: Command) {
    let engine = &session.engine;
    match cmd {
        Command::Help => cmd_help(),
        Command::Add {
            name,
            entity_type,
            facts,
        } => {
            let entity = engine.add_entity(&name, entity_type, facts.as_slice(), REPL_SOURCE);
            println!(
                "{} {} ({}, {} observation(s))",
                "✓".green().bold(),
                entity.name.bold(),
                entity.entity_type,
                entity.observations.len()
            );
        }
        Command::Observe { name, facts } => {
            if engine.add_observations(&name, facts.as_slice(), REPL_SOURCE) {
                println!("{} recorded {} fact(s) on {}", "✓".green().bold(), facts.len(), name.bold());
            } else {
                not_found(&name);
            }
        }
        Command::Forget { name, fact } => {
            if engine.remove_observation(&name, &fact) {
                println!("{} forgot '{}'", "✓".green().bold(), fact);
            } else {
                println!("{} no such observation on {}", "✗".red(), name.yellow());
            }
        }
        Command::Session { name, text } => {
            let entity = engine.update_session_context(&name, &text);
            println!("{} session context updated on {}", "✓".green().bold(), entity.name.bold());
        }
        Command::Get(name) => match engine.require_entity(&name) {
            Ok(entity) => print_entity(&entity),
            Err(e) => println!("{}", e.to_string().red()),
        },
        Command::Delete(name) => {
            if engine.delete_entity(&name) {
                println!("{} deleted {} and its relations", "✓".green().bold(), name.bold());
            } else {
                not_found(&name);
            }
        }
        Command::Relate {
            from,
            relation_type,
            to,
            weight,
        } => {
            let rel = engine.add_relation(&from, &to, &relation_type, weight, None);
            println!(
                "{} {} -[{} {:.2}]-> {}",
                "✓".green().bold(),
                rel.from.bold(),
                rel.relation_type.cyan(),
                rel.weight,
                rel.to.bold()
            );
        }
        Command::Unrelate {
            from,
            relation_type,
            to,
        } => {
            if engine.remove_relation(&from, &to, &relation_type) {
                println!("{} relation removed", "✓".green().bold());
            } else {
                println!("{} no such relation", "✗".red());
            }
        }
        Command::Prune => {
            let count = engine.prune_expired_relations();
            println!("{} pruned {} expired relation(s)", "✓".green().bold(), count);
        }
        Command::Search(query) => cmd_search(engine, &query),
        Command::Neighbors(name) => {
            let neighbors = engine.neighbors(&name);
            if neighbors.is_empty() {
                println!("  {}", "no neighbors".dimmed());
            }
            for n in &neighbors {
                println!(
                    "  {} {} {} {}",
                    arrow(n.direction),
                    n.relation_type.cyan(),
                    n.name.bold(),
                    format!("(weight {:.2})", n.weight).dimmed()
                );
            }
        }
        Command::Traverse { start, depth } => {
            let mut nodes: Vec<_> = engine.traverse(&start, depth).into_values().collect();
            if nodes.is_empty() {
                not_found(&start);
                return;
            }
            nodes.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.name.cmp(&b.name)));
            for node in &nodes {
                println!("  {} {}", format!("[{}]", node.distance).dimmed(), node.name.bold());
            }
        }
        Command::Consolidate => {
            let report = engine.consolidate();
            println!(
                "{} scanned {} entit(ies), {} merge(s), {} promotion(s)",
                "✓".green().bold(),
                report.entities_scanned,
                report.merges,
                report.total_promotions()
            );
            for (stage, count) in &report.promotions {
                println!("    → {}: {}", stage.to_string().cyan(), count);
            }
        }
        Command::Chunk(text) => match &session.chunks {
            Some(chunks) => match chunks.insert(&text) {
                Ok(id) => println!("{} chunk {}", "✓".green().bold(), id.dimmed()),
                Err(e) => println!("{}: {}", "Chunk store error".red(), e),
            },
            None => stores_unavailable(),
        },
        Command::Synthesize => match (&session.chunks, &session.skills) {
            (Some(chunks), Some(skills)) => match engine.synthesize_skills(chunks, skills) {
                Ok(created) => println!("{} {} new skill(s)", "✓".green().bold(), created),
                Err(e) => println!("{}", e.to_string().red()),
            },
            _ => stores_unavailable(),
        },
        Command::Skills => match &session.skills {
            Some(skills) => match skills.list() {
                Ok(list) if list.is_empty() => println!("  {}", "no skills yet".dimmed()),
                Ok(list) => {
                    for skill in &list {
                        println!(
                            "  {} {} {}",
                            skill.name.bold(),
                            format!("({:.0}%, {} instance(s))", skill.success_rate * 100.0, skill.evidence_count)
                                .dimmed(),
                            skill.intent
                        );
                    }
                }
                Err(e) => println!("{}: {}", "Skill store error".red(), e),
            },
            None => stores_unavailable(),
        },
        Command::Stats => {
            let stats = engine.stats();
            println!("{}", "Graph".bold().underline());
            println!("  Entities     : {}", stats.entities);
            println!(
                "  Relations    : {} ({} expired)",
                stats.relations, stats.expired_relations
            );
            println!("  Observations : {}", stats.observations);
            for (stage, count) in &stats.by_stage {
                println!("    {:<10} {}", stage.to_string(), count);
            }
            let state = if stats.dirty { "unsaved".yellow() } else { "saved".green() };
            println!("  Version      : {} ({})", stats.version, state);
        }
        Command::Save => match engine.flush(&session.graph_path) {
            Ok(true) => println!(
                "{} {}",
                "✓ Graph saved to".green(),
                session.graph_path.display().to_string().bold()
            ),
            Ok(false) => println!("  {}", "nothing to save".dimmed()),
            Err(e) => println!("{}", e.to_string().red()),
        },
        // Handled by the loop.
        Command::Quit => {}
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Cortex Commands".bold().underline());
    let rows = [
        ("/add <name> | <type> [| <facts>]", "create or merge an entity"),
        ("/observe <name> | <facts>", "add facts to an existing entity"),
        ("/forget <name> | <fact>", "remove one observation"),
        ("/session <name> | <summary>", "replace the session summary"),
        ("/get <name>", "show an entity"),
        ("/delete <name>", "delete an entity and its relations"),
        ("/relate <from> | <type> | <to> [| w]", "add or update a relation"),
        ("/unrelate <from> | <type> | <to>", "remove a relation"),
        ("/prune", "drop expired relations"),
        ("/search <query>", "ranked entity search"),
        ("/neighbors <name>", "direct relations"),
        ("/traverse <name> [depth]", "breadth-first expansion"),
        ("/consolidate", "merge duplicates and promote stages"),
        ("/chunk <text>", "record a raw interaction chunk"),
        ("/synthesize", "mine chunks for skills"),
        ("/skills", "list synthesized skills"),
        ("/stats", "graph statistics"),
        ("/save", "write the graph to disk"),
        ("/quit  /exit", "save and exit"),
    ];
    for (cmd, what) in rows {
        println!("  {:<40} {}", cmd.bold().cyan(), what);
    }
    println!("  Facts are separated with ';'.");
    println!();
}

fn cmd_search(engine: &MemoryEngine, query: &str) {
    let hits = engine.search(query, None);
    if hits.is_empty() {
        println!("  {}", "no matches".dimmed());
        return;
    }
    for hit in &hits {
        println!(
            "  {} {} {}",
            format!("{:.2}", hit.score).yellow(),
            hit.entity.name.bold(),
            format!("({})", hit.entity.entity_type).dimmed()
        );
        for obs in hit.entity.observations.iter().take(3) {
            println!("      • {}", obs.content);
        }
        for n in &hit.neighbors {
            println!("      {} {} {}", arrow(n.direction), n.relation_type.cyan(), n.name);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_entity(entity: &Entity) {
    println!(
        "{} {} {}",
        entity.name.bold().underline(),
        format!("({})", entity.entity_type).dimmed(),
        format!("accessed {}×", entity.access_count).dimmed()
    );
    for obs in &entity.observations {
        println!(
            "  [{}] {} {}",
            obs.stage.to_string().cyan(),
            obs.content,
            format!(
                "×{} from {}",
                obs.evidence.confirmations,
                obs.evidence.sources.join(", ")
            )
            .dimmed()
        );
    }
}

fn arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Outgoing => "→",
        Direction::Incoming => "←",
    }
}

fn not_found(name: &str) {
    println!("{} '{}'", "Entity not found:".red(), name.yellow());
}

fn stores_unavailable() {
    println!("{}", "Chunk/skill stores are not available in this session.".yellow());
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── simple commands ──────────────────────────────────────────────────────

    #[test]
    fn bare_commands_parse() {
        assert_eq!(parse_command("/help"), Ok(Command::Help));
        assert_eq!(parse_command("  /exit  "), Ok(Command::Quit));
        assert_eq!(parse_command("/quit"), Ok(Command::Quit));
        assert_eq!(parse_command("/stats"), Ok(Command::Stats));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = parse_command("/launch").unwrap_err();
        assert!(err.contains("/launch"));
    }

    // ── field commands ───────────────────────────────────────────────────────

    #[test]
    fn add_splits_type_and_facts() {
        let cmd = parse_command("/add Redis | technology | in-memory store;  supports pub/sub ; ").unwrap();
        assert_eq!(
            cmd,
            Command::Add {
                name: "Redis".into(),
                entity_type: EntityType::Technology,
                facts: vec!["in-memory store".into(), "supports pub/sub".into()],
            }
        );
    }

    #[test]
    fn add_with_unknown_type_falls_back_to_other() {
        match parse_command("/add Widget | gizmo").unwrap() {
            Command::Add { entity_type, facts, .. } => {
                assert_eq!(entity_type, EntityType::Other);
                assert!(facts.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn add_without_type_is_usage_error() {
        assert!(parse_command("/add Redis").unwrap_err().starts_with("Usage:"));
    }

    #[test]
    fn observe_requires_a_fact() {
        assert!(parse_command("/observe Redis | ;").is_err());
        assert_eq!(
            parse_command("/observe Redis | fast").unwrap(),
            Command::Observe {
                name: "Redis".into(),
                facts: vec!["fast".into()],
            }
        );
    }

    #[test]
    fn relate_defaults_and_parses_weight() {
        assert_eq!(
            parse_command("/relate Alice | works_at | Acme").unwrap(),
            Command::Relate {
                from: "Alice".into(),
                relation_type: "works_at".into(),
                to: "Acme".into(),
                weight: DEFAULT_RELATION_WEIGHT,
            }
        );
        match parse_command("/relate Alice | knows | Bob | 0.4").unwrap() {
            Command::Relate { weight, .. } => assert!((weight - 0.4).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_command("/relate Alice | knows | Bob | lots").is_err());
        assert!(parse_command("/relate Alice | | Bob").is_err());
    }

    #[test]
    fn single_argument_commands_keep_spaces() {
        assert_eq!(
            parse_command("/search redis cluster").unwrap(),
            Command::Search("redis cluster".into())
        );
        assert!(parse_command("/get").is_err());
    }

    // ── traverse ─────────────────────────────────────────────────────────────

    #[test]
    fn traverse_reads_trailing_depth() {
        assert_eq!(
            parse_command("/traverse Project X 3").unwrap(),
            Command::Traverse {
                start: "Project X".into(),
                depth: Some(3),
            }
        );
        assert_eq!(
            parse_command("/traverse Project X").unwrap(),
            Command::Traverse {
                start: "Project X".into(),
                depth: None,
            }
        );
    }

    #[test]
    fn traverse_numeric_name_is_not_a_depth() {
        assert_eq!(
            parse_command("/traverse 42").unwrap(),
            Command::Traverse {
                start: "42".into(),
                depth: None,
            }
        );
    }
}
