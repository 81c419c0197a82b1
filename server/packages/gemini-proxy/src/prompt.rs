//! Compiles a chat transcript (or a raw prompt) into the single flat prompt
//! string the Gemini CLI accepts.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use gemini_proxy_error::ProxyError;

pub const DEFAULT_MAX_PROMPT_CHARS: usize = 10_000;

const SEGMENT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

/// Legacy completion-style `prompt` field: a string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum PromptInput {
    Text(String),
    Lines(Vec<String>),
}

impl PromptInput {
    fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Lines(lines) => lines.join("\n"),
        }
    }
}

/// Folds system messages into a leading `System:` segment, renders the rest as
/// `Human:` / `Assistant:` turns and invites a reply when the user spoke last.
pub fn compile_messages(messages: &[ChatMessage]) -> String {
    let mut segments = Vec::with_capacity(messages.len() + 2);

    let system: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| message.content.as_str())
        .collect();
    if !system.is_empty() {
        segments.push(format!("System: {}", system.join("\n")));
    }

    for message in messages {
        match message.role {
            Role::User => segments.push(format!("Human: {}", message.content)),
            Role::Assistant => segments.push(format!("Assistant: {}", message.content)),
            Role::System => {}
        }
    }

    if matches!(messages.last(), Some(message) if message.role == Role::User) {
        segments.push("Assistant:".to_string());
    }

    segments.join(SEGMENT_SEPARATOR)
}

/// Resolves the prompt for one request. Messages win over `prompt`; the raw
/// prompt path strips control characters and enforces `max_chars`.
pub fn compile_prompt(
    messages: &[ChatMessage],
    prompt: Option<&PromptInput>,
    max_chars: usize,
) -> Result<String, ProxyError> {
    if !messages.is_empty() {
        return Ok(compile_messages(messages));
    }

    let Some(prompt) = prompt else {
        return Err(ProxyError::invalid_request("No messages or prompt provided"));
    };

    let cleaned = strip_control_chars(&prompt.to_text());
    if cleaned.is_empty() {
        return Err(ProxyError::invalid_request("Prompt cannot be empty"));
    }
    if cleaned.chars().count() > max_chars {
        return Err(ProxyError::invalid_request(format!(
            "Prompt too long (max {max_chars} characters)"
        )));
    }
    Ok(cleaned)
}

fn strip_control_chars(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
