//! Append-only conversation history.
//!
//! The orchestrator is the only writer: messages are pushed as the
//! conversation progresses and never mutated afterwards. Blocks carry the
//! tagged layout providers expect for tool-use turns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Author role: `user`, `assistant`, or whatever the provider reports.
    pub role: String,
    /// Ordered content blocks of this turn.
    pub content: Vec<ContentBlock>,
}

impl HistoryMessage {
    /// A `user` turn carrying a single text block.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// A single content block within a history message.
///
/// The tag discriminates how the block is rendered back to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text, from either side of the conversation.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool invocation the model requested.
    ToolUse {
        /// Provider-assigned tool call id.
        id: String,
        /// Namespaced tool name (`<server>__<tool>`).
        name: String,
        /// JSON arguments as the model supplied them.
        input: Value,
    },
    /// The outcome of one tool invocation, fed back to the model.
    ToolResult {
        /// The id of the `tool_use` block this answers.
        tool_use_id: String,
        /// Raw result content items from the tool server.
        content: Vec<Value>,
        /// Flattened text form of `content` (text items, space-joined).
        text: String,
    },
}
