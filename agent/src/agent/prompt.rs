//! Prompt construction
//!
//! Rendering is a pure function of the identity, recalled memories, prior
//! turns and input, so identical calls produce identical prompts.

use std::fmt::Write;

use serde_json::Value;

use super::{AgentIdentity, TaskInput};
use crate::db::{AgentMemory, Message, MessageRole};

pub const MEMORY_HEADING: &str = "## Relevant memories";
pub const HISTORY_HEADING: &str = "## Conversation so far";
pub const REQUEST_HEADING: &str = "## Request";
pub const FILE_MARKER_PREFIX: &str = "[File: ";

const PERSONA_PREFIX: &str = "You are ";

/// Memory values longer than this are cut in the prompt
const MEMORY_VALUE_CHARS: usize = 100;

/// Full prompt sent to the model backend
pub fn build(
    identity: &AgentIdentity,
    memories: &[AgentMemory],
    history: &[Message],
    input: &TaskInput,
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{PERSONA_PREFIX}{}.", identity.name);
    if !identity.description.is_empty() {
        let _ = writeln!(out, "{}", identity.description);
    }
    if !identity.goal.is_empty() {
        let _ = writeln!(out, "Goal: {}", identity.goal);
    }
    if !identity.capabilities.is_empty() {
        let labels: Vec<_> = identity.capabilities.iter().map(|c| c.label()).collect();
        let _ = writeln!(out, "Capabilities: {}", labels.join(", "));
    }
    if !identity.instructions.is_empty() {
        let _ = write!(out, "\n{}\n", identity.instructions.trim_end());
    }

    if !memories.is_empty() {
        let _ = write!(out, "\n{MEMORY_HEADING}\n");
        for memory in memories {
            let value = render_value(&memory.value);
            let mut shown: String = value.chars().take(MEMORY_VALUE_CHARS).collect();
            if shown.len() < value.len() {
                shown.push_str("...");
            }
            let _ = writeln!(out, "- {}: {shown}", memory.key);
        }
    }

    let turns: Vec<_> = history
        .iter()
        .filter(|m| m.role != MessageRole::Separator)
        .collect();
    if !turns.is_empty() {
        let _ = write!(out, "\n{HISTORY_HEADING}\n");
        for message in turns {
            let speaker = match message.role {
                MessageRole::Human => "Human",
                _ => "AI",
            };
            let _ = writeln!(out, "{speaker}: {}", message.content);
        }
    }

    let _ = write!(out, "\n{REQUEST_HEADING}\n{}\n", render_request(input));
    out
}

/// The human turn as stored in the conversation log
pub fn render_request(input: &TaskInput) -> String {
    let mut out = input.task.trim().to_string();

    if !input.fields.is_empty() {
        out.push_str("\n\nFields:");
        for (key, value) in &input.fields {
            let _ = write!(out, "\n- {key}: {}", render_value(value));
        }
    }

    for file in &input.files {
        let _ = write!(
            out,
            "\n\n{FILE_MARKER_PREFIX}{} ({})]\n{}",
            file.name, file.mime_type, file.content
        );
    }

    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Persona name from the first prompt line, if the prompt was built here
pub fn persona_name(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .next()?
        .strip_prefix(PERSONA_PREFIX)?
        .strip_suffix('.')
}

/// Text after the last request heading, or the whole prompt
pub fn request_section(prompt: &str) -> &str {
    match prompt.rfind(REQUEST_HEADING) {
        Some(idx) => &prompt[idx + REQUEST_HEADING.len()..],
        None => prompt,
    }
}
