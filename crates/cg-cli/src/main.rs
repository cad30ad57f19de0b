//! chatgraph: conversation memory command-line tool
//!
//! Usage:
//!   chatgraph append <conversation-id> [file]     - Append a JSON array of messages
//!   chatgraph fetch <conversation-id> [--last N]  - Print the latest messages as JSON
//!   chatgraph clear <conversation-id>             - Remove a conversation's messages
//!   chatgraph info                                - Show the effective configuration
//!   chatgraph --help                              - Show help

mod cli;

use std::path::PathBuf;

use anyhow::{Context, bail};
use cg_core::{Config, GraphChatMemory};
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq)]
enum RunMode {
    /// Append messages read from a file or stdin
    Append {
        conversation_id: String,
        input: Option<PathBuf>,
    },
    /// Print the latest messages
    Fetch {
        conversation_id: String,
        last_n: Option<usize>,
    },
    /// Clear a conversation
    Clear { conversation_id: String },
    /// Show configuration
    Info,
    /// Show help
    Help,
    /// Show version
    Version,
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_args(&args)?;

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("chatgraph {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Logs go to stderr so stdout carries only JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    if mode == RunMode::Info {
        return cli::run_info(&config);
    }

    let driver = config
        .graph
        .open()
        .with_context(|| format!("Failed to open graph database at {}", config.graph.db_path))?;
    let memory = GraphChatMemory::new(driver, config.memory.to_chat_memory_config()?);

    match mode {
        RunMode::Append {
            conversation_id,
            input,
        } => cli::run_append(&memory, &conversation_id, input.as_deref()),
        RunMode::Fetch {
            conversation_id,
            last_n,
        } => cli::run_fetch(&memory, &conversation_id, last_n),
        RunMode::Clear { conversation_id } => cli::run_clear(&memory, &conversation_id),
        _ => Ok(()),
    }
}

/// Parse command line arguments (without the program name)
fn parse_args(args: &[String]) -> anyhow::Result<RunMode> {
    let Some(command) = args.first() else {
        return Ok(RunMode::Help);
    };
    let rest = &args[1..];

    match command.as_str() {
        "--help" | "-h" => Ok(RunMode::Help),
        "--version" | "-v" => Ok(RunMode::Version),
        "append" => {
            let conversation_id = required_id(rest, "append")?;
            let input = rest.get(1).filter(|p| p.as_str() != "-").map(PathBuf::from);
            if rest.len() > 2 {
                bail!("append takes at most one input file");
            }
            Ok(RunMode::Append {
                conversation_id,
                input,
            })
        }
        "fetch" => {
            let conversation_id = required_id(rest, "fetch")?;
            let mut last_n = None;
            let mut options = rest[1..].iter();
            while let Some(option) = options.next() {
                match option.as_str() {
                    "--last" | "-n" => {
                        let value = options.next().context("--last requires a number")?;
                        last_n = Some(
                            value
                                .parse()
                                .with_context(|| format!("invalid --last value: {}", value))?,
                        );
                    }
                    other => bail!("unknown fetch option: {}", other),
                }
            }
            Ok(RunMode::Fetch {
                conversation_id,
                last_n,
            })
        }
        "clear" => Ok(RunMode::Clear {
            conversation_id: required_id(rest, "clear")?,
        }),
        "info" => Ok(RunMode::Info),
        other => bail!("unknown command: {} (see --help)", other),
    }
}

fn required_id(rest: &[String], command: &str) -> anyhow::Result<String> {
    match rest.first() {
        Some(id) if !id.is_empty() => Ok(id.clone()),
        _ => bail!("{} requires a conversation id", command),
    }
}

/// Print help message
fn print_help() {
    println!("chatgraph - conversation memory stored as a graph");
    println!();
    println!("Usage:");
    println!("  chatgraph append <conversation-id> [file]     Append a JSON array of messages (stdin if no file)");
    println!("  chatgraph fetch <conversation-id> [--last N]  Print the latest N messages (default: all)");
    println!("  chatgraph clear <conversation-id>             Remove every message of a conversation");
    println!("  chatgraph info                                Show the effective configuration");
    println!("  chatgraph --help                              Show this help message");
    println!("  chatgraph --version                           Show version");
    println!();
    println!("Configuration is read from ./chatgraph.toml when present.");
    println!();
    println!("Environment Variables:");
    println!("  CG_DB_PATH                       Graph database file (default: data/chatgraph.db)");
    println!("  CG_BUSY_TIMEOUT_MS               Wait for the database lock (default: 5000)");
    println!("  CG_SESSION_LABEL                 Conversation node label (default: Session)");
    println!("  CG_USER_LABEL                    User message label (default: UserMessage)");
    println!("  CG_ASSISTANT_LABEL               Assistant message label (default: AssistantMessage)");
    println!("  CG_TOOL_RESPONSE_LABEL           Tool response label (default: ToolResponseMessage)");
    println!("  CG_TIME_TO_LIVE_SECS             Conversation time-to-live (default: never expire)");
    println!("  CG_REMOVE_CONVERSATION_ON_CLEAR  Delete the conversation node on clear (default: false)");
    println!("  RUST_LOG                         Log filter (default: info)");
}
