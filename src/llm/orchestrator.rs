//! Conversation engine with tool loop execution.
//!
//! The orchestrator owns the conversation history and drives the loop:
//! send the history to the provider, dispatch any requested tool calls
//! through the connected servers, append the results, and ask the model
//! again. A turn with no tool calls terminates the loop and its text is the
//! final answer.
//!
//! Tool dispatch errors are deliberately asymmetric: malformed tool names,
//! unknown servers and non-object arguments are engine-side defects and
//! dropped silently (no `tool_result` is emitted), while tool execution
//! failures become model-visible error text so the model can adapt on the
//! next turn. Preserve this distinction when changing dispatch; surfacing
//! the dropped cases changes model-facing behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::history::{ContentBlock, HistoryMessage};
use crate::mcp::ToolServer;
use crate::mcp::catalog::split_namespaced;

use super::{Provider, ProviderError, ProviderMessage, Tool};

/// First backoff delay after a transient overload error.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Ceiling on any single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Overload retries before giving up.
const MAX_RETRIES: u32 = 5;

/// The conversation engine.
///
/// Holds the provider, the dispatch map of connected tool servers keyed by
/// server name, the flattened tool catalog, and the history it alone
/// mutates.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    servers: HashMap<String, Arc<dyn ToolServer>>,
    tools: Vec<Tool>,
    history: Vec<HistoryMessage>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("server_count", &self.servers.len())
            .field("tool_count", &self.tools.len())
            .field("history_len", &self.history.len())
            .finish()
    }
}

impl Orchestrator {
    /// Create an engine over a provider, a dispatch map and a tool catalog.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        servers: HashMap<String, Arc<dyn ToolServer>>,
        tools: Vec<Tool>,
    ) -> Self {
        Self {
            provider,
            servers,
            tools,
            history: Vec::new(),
        }
    }

    /// The conversation so far. Append-only; blocks are never mutated after
    /// they are appended.
    #[must_use]
    pub fn history(&self) -> &[HistoryMessage] {
        &self.history
    }

    /// Run the conversation to completion and return the model's final
    /// text.
    ///
    /// Written as an explicit loop with a local next-prompt variable rather
    /// than recursion, so long tool-calling chains cannot grow the stack.
    pub async fn run(&mut self, prompt: &str) -> anyhow::Result<String> {
        let mut next_prompt = prompt.to_string();

        loop {
            if !next_prompt.is_empty() {
                self.history.push(HistoryMessage::user_text(&next_prompt));
            }

            let message = self.create_message_with_backoff().await?;

            tracing::debug!(
                role = %message.role,
                tool_call_count = message.tool_calls.len(),
                "provider turn received"
            );

            let mut assistant_content = Vec::new();
            if !message.content.is_empty() {
                assistant_content.push(ContentBlock::Text {
                    text: message.content.clone(),
                });
            }

            let mut tool_results = Vec::new();

            for call in &message.tool_calls {
                assistant_content.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                });

                if let Some(result) = self.dispatch(call).await {
                    tool_results.push(result);
                }
            }

            self.history.push(HistoryMessage {
                role: message.role.clone(),
                content: assistant_content,
            });

            if tool_results.is_empty() {
                return Ok(message.content);
            }

            self.history.push(HistoryMessage {
                role: "user".to_string(),
                content: tool_results,
            });
            next_prompt = String::new();
        }
    }

    /// Call the provider, retrying transient overload errors with bounded
    /// exponential backoff. Any other error returns immediately.
    async fn create_message_with_backoff(&self) -> anyhow::Result<ProviderMessage> {
        let mut retries: u32 = 0;

        loop {
            match self.provider.create_message(&self.history, &self.tools).await {
                Ok(message) => return Ok(message),
                Err(ProviderError::Overloaded(detail)) => {
                    if retries >= MAX_RETRIES {
                        tracing::error!(retries, "provider overload retry budget exhausted");
                        anyhow::bail!(
                            "the model provider is currently overloaded; \
                             please wait a few minutes and try again"
                        );
                    }
                    let delay = backoff_delay(retries);
                    tracing::warn!(
                        retry = retries + 1,
                        delay_secs = delay.as_secs(),
                        detail = %detail,
                        "provider overloaded, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Dispatch one tool call. Returns the `tool_result` block to feed
    /// back, or `None` when the call is dropped.
    async fn dispatch(&self, call: &super::ToolCall) -> Option<ContentBlock> {
        let Some((server_name, tool_name)) = split_namespaced(&call.name) else {
            tracing::debug!(tool = %call.name, "dropping tool call with malformed name");
            return None;
        };

        let Some(server) = self.servers.get(server_name) else {
            tracing::debug!(
                server = %server_name,
                tool = %tool_name,
                "dropping tool call for unknown server"
            );
            return None;
        };

        let Some(arguments) = call.arguments.as_object() else {
            tracing::debug!(tool = %call.name, "dropping tool call with non-object arguments");
            return None;
        };

        match server.call_tool(tool_name, arguments.clone()).await {
            Ok(content) => {
                tracing::info!(tool = %call.name, id = %call.id, "tool call succeeded");
                let text = flatten_text(&content);
                Some(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content,
                    text,
                })
            }
            Err(e) => {
                // Visible to the model on the next turn; never fatal to the
                // conversation.
                tracing::error!(tool = %call.name, id = %call.id, error = %e, "tool call failed");
                let message = format!("Error calling tool {tool_name}: {e}");
                Some(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: vec![serde_json::json!({"type": "text", "text": message})],
                    text: message,
                })
            }
        }
    }
}

/// Backoff before overload retry `retry` (zero-based): 1s doubled per
/// attempt, capped at 30s.
fn backoff_delay(retry: u32) -> Duration {
    // 2^5 s already exceeds the cap; clamping the shift avoids overflow.
    let factor = 1u32 << retry.min(5);
    INITIAL_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Space-join the `text` field of every text-bearing content item, trimmed.
fn flatten_text(content: &[Value]) -> String {
    let mut text = String::new();
    for item in content {
        if let Some(t) = item.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(t);
        }
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let delays: Vec<_> = (0..MAX_RETRIES).map(backoff_delay).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(delays.iter().all(|d| *d <= MAX_BACKOFF));
        assert_eq!(backoff_delay(5), MAX_BACKOFF);
        assert_eq!(backoff_delay(40), MAX_BACKOFF);
    }

    #[test]
    fn flatten_joins_text_items_and_skips_the_rest() {
        let content = vec![
            serde_json::json!({"type": "text", "text": "a.txt"}),
            serde_json::json!({"type": "image", "data": "ZmFrZQ=="}),
            serde_json::json!({"type": "text", "text": " b.txt "}),
        ];
        assert_eq!(flatten_text(&content), "a.txt  b.txt");
        assert_eq!(flatten_text(&[]), "");
    }
}
