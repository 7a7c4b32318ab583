use std::pin::Pin;

use serde::Serialize;

use sr_domain::error::Result;
use sr_domain::message::{Message, ToolCall, ToolDefinition};
use sr_domain::usage::UsageRecord;

/// A boxed async stream, used for streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_util::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier override. `None` uses the provider's default.
    pub model: Option<String>,
    /// When `true`, ask the model to respond with valid JSON only.
    pub json_mode: bool,
}

/// A provider-agnostic completion response.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls emitted by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Parsed usage metadata, when the provider reported any.
    pub usage: Option<UsageRecord>,
    /// The model that actually produced the response.
    pub model: String,
    /// Why the model stopped (e.g. "stop", "tool_calls").
    pub finish_reason: Option<String>,
}

/// Events emitted during streaming (provider-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "token")]
    Token { text: String },
    #[serde(rename = "done")]
    Done {
        usage: Option<UsageRecord>,
        finish_reason: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Contract every LLM adapter implements.
///
/// Adapters translate between these types and the wire format of each
/// provider's API; the runtime never sees provider specifics.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse>;

    /// Send a completion request and return a stream of events.
    async fn generate_stream(
        &self,
        req: GenerateRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Estimate how many prompt tokens `text` costs for this model.
    fn estimate_token_count(&self, text: &str) -> u64 {
        estimate_tokens(text)
    }

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Character-quartet heuristic used when a provider has no tokenizer.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
