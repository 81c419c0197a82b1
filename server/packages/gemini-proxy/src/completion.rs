//! Chat completion request parsing and response assembly.

use std::time::Instant;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};
use utoipa::ToSchema;

use gemini_proxy_error::ProxyError;

use crate::executor::{truncate_chars, StrategyExecutor};
use crate::prompt::{compile_prompt, ChatMessage, PromptInput};
use crate::sanitize::{sanitize_or_fallback, SanitizeOptions};
use crate::tokens::estimate_tokens;

pub const DEFAULT_MODEL: &str = "gemini-local";
pub const SUPPORTED_MODELS: &[&str] = &[DEFAULT_MODEL, "gemini-2.5-pro-preview-06-05"];

const PROMPT_PREVIEW_CHARS: usize = 200;

/// OpenAI-style chat completion request. Sampling fields are accepted for
/// compatibility and ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub stop: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// `"messages": null` reads the same as an absent field.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ChatMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ChatMessage>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatCompletionRequest {
    /// Parses a request body, mapping every failure to `InvalidRequest`.
    pub fn from_slice(body: &[u8]) -> Result<Self, ProxyError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ProxyError::invalid_request("Invalid JSON body"));
        }
        let request: Self = serde_json::from_slice(body).map_err(|err| {
            if err.is_syntax() || err.is_eof() {
                ProxyError::invalid_request(format!("Invalid JSON body: {err}"))
            } else {
                ProxyError::invalid_request(format!("Invalid request format: {err}"))
            }
        })?;
        request.model()?;
        Ok(request)
    }

    /// The requested model, or the default. Names are limited to
    /// `[A-Za-z0-9._-]`.
    pub fn model(&self) -> Result<&str, ProxyError> {
        let Some(model) = self.model.as_deref() else {
            return Ok(DEFAULT_MODEL);
        };
        let valid = !model.is_empty()
            && model
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(ProxyError::invalid_request("Invalid model name"));
        }
        Ok(model)
    }

    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = estimate_tokens(prompt);
        let completion_tokens = estimate_tokens(completion);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    pub index: u32,
    /// Serialized as `null` on content chunks.
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// The outcome of one completion, rendered either as a single response or as
/// a sequence of chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub request_id: String,
    pub model: String,
    pub content: String,
    pub usage: Usage,
    pub created: i64,
}

impl CompletionResult {
    pub fn id(&self) -> String {
        format!("chatcmpl-{}", self.request_id)
    }

    pub fn system_fingerprint(&self) -> String {
        format!("fp_{}", truncate_chars(&self.request_id, 8))
    }

    pub fn to_response(&self) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.id(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content: self.content.clone(),
                },
                finish_reason: "stop".to_string(),
            }],
            usage: self.usage,
        }
    }

    pub fn chunk(&self, content: impl Into<String>) -> ChatCompletionChunk {
        self.build_chunk(
            ChunkDelta {
                content: Some(content.into()),
            },
            None,
        )
    }

    pub fn stop_chunk(&self) -> ChatCompletionChunk {
        self.build_chunk(ChunkDelta::default(), Some("stop".to_string()))
    }

    fn build_chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                delta,
                index: 0,
                finish_reason,
            }],
        }
    }
}

/// Prompt compilation, CLI execution and sanitization for one request.
#[derive(Debug, Clone)]
pub struct CompletionService {
    executor: StrategyExecutor,
    sanitize: SanitizeOptions,
    max_prompt_chars: usize,
}

impl CompletionService {
    pub fn new(executor: StrategyExecutor, sanitize: SanitizeOptions, max_prompt_chars: usize) -> Self {
        Self {
            executor,
            sanitize,
            max_prompt_chars,
        }
    }

    pub async fn complete(
        &self,
        request: &ChatCompletionRequest,
        request_id: &str,
    ) -> Result<CompletionResult, ProxyError> {
        let start = Instant::now();
        let model = request.model()?.to_string();
        info!(
            request_id,
            model = %model,
            messages = request.messages.len(),
            stream = request.wants_stream(),
            "chat completion started"
        );

        let prompt = compile_prompt(
            &request.messages,
            request.prompt.as_ref(),
            self.max_prompt_chars,
        )?;
        debug!(
            request_id,
            prompt_chars = prompt.chars().count(),
            preview = %truncate_chars(&prompt, PROMPT_PREVIEW_CHARS),
            "compiled prompt"
        );

        let raw = self.executor.execute(&prompt).await?;
        debug!(request_id, raw_len = raw.len(), "raw cli output");

        let content = sanitize_or_fallback(&raw, self.sanitize);
        let usage = Usage::estimate(&prompt, &content);
        info!(
            request_id,
            total_tokens = usage.total_tokens,
            duration_ms = start.elapsed().as_millis() as u64,
            "chat completion finished"
        );

        Ok(CompletionResult {
            request_id: request_id.to_string(),
            model,
            content,
            usage,
            created: OffsetDateTime::now_utc().unix_timestamp(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelListResponse {
    pub fn supported() -> Self {
        Self {
            object: "list".to_string(),
            data: SUPPORTED_MODELS
                .iter()
                .map(|id| ModelInfo {
                    id: id.to_string(),
                    object: "model".to_string(),
                    owned_by: "local".to_string(),
                })
                .collect(),
        }
    }
}
