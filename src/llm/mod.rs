//! Model provider contract and catalog types.
//!
//! The [`Provider`] trait is the single seam between the conversation loop
//! and a model backend: one call, one [`ProviderMessage`] back. The
//! concrete [`ChatCompletionsProvider`] speaks the OpenAI-compatible Chat
//! Completions API; tests substitute scripted providers.

pub mod chat_completions;
pub mod orchestrator;

pub use chat_completions::ChatCompletionsProvider;
pub use orchestrator::Orchestrator;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::history::HistoryMessage;

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4`, `mistral-small`).
    pub model: String,
}

/// A tool the model may call, namespaced as `<server>__<tool>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Namespaced tool name.
    pub name: String,
    /// Description copied verbatim from the owning server.
    pub description: String,
    /// Input schema copied verbatim from the owning server.
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolSchema,
}

/// The JSON-schema subset MCP servers advertise for tool input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Schema type, `object` for every tool seen in the wild.
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Property name to schema fragment.
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    /// Names of required properties.
    #[serde(default)]
    pub required: Vec<String>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned id, echoed back in the matching `tool_result`.
    pub id: String,
    /// Namespaced tool name as the model produced it.
    pub name: String,
    /// JSON arguments. Dispatch requires an object; anything else is
    /// dropped silently.
    pub arguments: Value,
}

/// One model turn: text plus zero or more tool-call requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderMessage {
    /// Role the provider reports, normally `assistant`.
    pub role: String,
    /// Assistant text, possibly empty on pure tool-call turns.
    pub content: String,
    /// Tool calls in the order the provider returned them.
    pub tool_calls: Vec<ToolCall>,
}

/// Errors surfaced by a model provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transient capacity error; eligible for retry with backoff.
    #[error("provider overloaded: {0}")]
    Overloaded(String),
    /// Transport-level failure.
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success status that is not an overload signal.
    #[error("provider returned status {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },
    /// Response arrived but did not have the expected shape.
    #[error("malformed provider response: {0}")]
    Decode(String),
}

/// Contract every model backend adapter implements.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Request one message from the model given the full conversation
    /// history and the flattened tool catalog.
    async fn create_message(
        &self,
        history: &[HistoryMessage],
        tools: &[Tool],
    ) -> Result<ProviderMessage, ProviderError>;
}
