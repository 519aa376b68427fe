//! OpenAI Chat Completions provider adapter.
//!
//! Renders history blocks into chat-completions messages and maps the
//! response back into a [`ProviderMessage`]. Works against any
//! OpenAI-compatible endpoint (OpenAI, OpenRouter, Ollama, vLLM, ...).

use serde_json::{Value, json};

use crate::history::{ContentBlock, HistoryMessage};

use super::{LlmSettings, Provider, ProviderError, ProviderMessage, Tool, ToolCall};

/// Marker some backends put in the body of transient capacity errors.
const OVERLOADED_MARKER: &str = "overloaded_error";

/// Provider adapter for `/v1/chat/completions`.
#[derive(Clone)]
pub struct ChatCompletionsProvider {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsProvider")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl ChatCompletionsProvider {
    /// Create a new provider with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait::async_trait]
impl Provider for ChatCompletionsProvider {
    async fn create_message(
        &self,
        history: &[HistoryMessage],
        tools: &[Tool],
    ) -> Result<ProviderMessage, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let body = json!({
            "model": self.settings.model,
            "messages": render_messages(history),
            "tools": if tools.is_empty() { Value::Null } else { Value::Array(render_tools(tools)) },
        });

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 || body.contains(OVERLOADED_MARKER) {
                return Err(ProviderError::Overloaded(body));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let v: Value = resp.json().await?;
        parse_message(&v)
    }
}

/// Render history blocks as chat-completions messages.
///
/// `tool_result` blocks become one `role: "tool"` message each, keyed by
/// `tool_call_id`; the remaining blocks fold into the turn's own message.
fn render_messages(history: &[HistoryMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len());
    for message in history {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut tool_messages = Vec::new();

        for block in &message.content {
            match block {
                ContentBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": serde_json::to_string(input)
                                .unwrap_or_else(|_| "{}".to_string()),
                        }
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    text: result_text,
                    ..
                } => {
                    tool_messages.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": result_text,
                    }));
                }
            }
        }

        if !text.is_empty() || !tool_calls.is_empty() {
            let mut msg = json!({
                "role": message.role,
                "content": if text.is_empty() { Value::Null } else { Value::String(text) },
            });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(msg);
        }
        out.extend(tool_messages);
    }
    out
}

/// Render the catalog in OpenAI function-schema form.
fn render_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": {
                        "type": tool.input_schema.schema_type,
                        "properties": tool.input_schema.properties,
                        "required": tool.input_schema.required,
                    }
                }
            })
        })
        .collect()
}

fn parse_message(v: &Value) -> Result<ProviderMessage, ProviderError> {
    let message = v
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::Decode("response has no choices[0].message".to_string()))?;

    let role = message
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("assistant")
        .to_string();
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let function = tc.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let raw_args = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    // Unparseable argument strings are preserved as JSON
                    // strings; the dispatch loop drops non-object arguments
                    // silently.
                    let arguments = serde_json::from_str(raw_args)
                        .unwrap_or_else(|_| Value::String(raw_args.to_string()));
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ProviderMessage {
        role,
        content,
        tool_calls,
    })
}
