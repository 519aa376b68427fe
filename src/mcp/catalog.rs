//! Flattening per-server tool lists into one namespaced catalog.

use rmcp::model::Tool as McpTool;
use serde_json::Value;

use crate::llm::{Tool, ToolSchema};

/// Separator between server name and tool name in catalog entries.
///
/// Routing splits on this exact sequence, so server and tool names must not
/// themselves contain `__`. That is a constraint on configuration, not
/// something enforced here.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Namespace one server's tools into the global catalog, copying
/// description and input schema verbatim. Pure and infallible.
#[must_use]
pub fn flatten(server_name: &str, tools: &[McpTool]) -> Vec<Tool> {
    tools
        .iter()
        .map(|tool| Tool {
            name: format!("{server_name}{NAMESPACE_SEPARATOR}{}", tool.name),
            description: tool.description.as_deref().unwrap_or_default().to_string(),
            input_schema: schema_of(tool),
        })
        .collect()
}

/// Split a namespaced name back into `(server, tool)`.
///
/// Returns `None` for anything that is not the two-part form produced by
/// [`flatten`]; callers treat that as a malformed name and drop the call.
#[must_use]
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    let (server, tool) = name.split_once(NAMESPACE_SEPARATOR)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

fn schema_of(tool: &McpTool) -> ToolSchema {
    let schema = tool.input_schema.as_ref();
    ToolSchema {
        schema_type: schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("object")
            .to_string(),
        properties: schema
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        required: schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| {
                req.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
    }
}
