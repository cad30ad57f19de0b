//! Command implementations
//!
//! Every command talks to the store through [`ChatMemory`]; output meant
//! for other programs (fetched messages, configuration) goes to stdout as
//! JSON.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use cg_core::{ChatMemory, Config, Message};
use serde_json::json;
use tracing::info;

/// Append the JSON array of messages in `input` (stdin when `None`)
pub fn run_append(memory: &dyn ChatMemory, conversation_id: &str, input: Option<&Path>) -> anyhow::Result<()> {
    let content = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read messages from stdin")?;
            buffer
        }
    };

    let messages = parse_messages(&content)?;
    memory.append(conversation_id, &messages)?;
    info!("Appended {} message(s) to {}", messages.len(), conversation_id);
    Ok(())
}

/// Print the latest `last_n` messages (all when `None`) as a JSON array
pub fn run_fetch(memory: &dyn ChatMemory, conversation_id: &str, last_n: Option<usize>) -> anyhow::Result<()> {
    let messages = memory.fetch(conversation_id, last_n.unwrap_or(usize::MAX))?;
    let stdout = std::io::stdout();
    write_messages(&mut stdout.lock(), &messages)
}

pub fn run_clear(memory: &dyn ChatMemory, conversation_id: &str) -> anyhow::Result<()> {
    memory.clear(conversation_id)?;
    Ok(())
}

/// Print the effective configuration
pub fn run_info(config: &Config) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    write_info(&mut stdout.lock(), config)
}

/// Accept either a JSON array of messages or a single message object
fn parse_messages(content: &str) -> anyhow::Result<Vec<Message>> {
    let value: serde_json::Value = serde_json::from_str(content).context("Input is not valid JSON")?;
    let messages = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|message| vec![message])
    };
    messages.context("Input does not describe chat messages")
}

fn write_messages(out: &mut impl Write, messages: &[Message]) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, messages)?;
    writeln!(out)?;
    Ok(())
}

fn write_info(out: &mut impl Write, config: &Config) -> anyhow::Result<()> {
    let memory = config.memory.to_chat_memory_config()?;
    let info = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "db_path": config.graph.db_path,
        "busy_timeout_ms": config.graph.busy_timeout_ms,
        "labels": {
            "session": memory.session_label(),
            "user": memory.user_label(),
            "assistant": memory.assistant_label(),
            "tool_response": memory.tool_response_label(),
        },
        "time_to_live_secs": memory.retention().time_to_live_secs(),
        "remove_conversation_on_clear": memory.remove_conversation_on_clear(),
    });
    serde_json::to_writer_pretty(&mut *out, &info)?;
    writeln!(out)?;
    Ok(())
}
