//! MCP client configuration, connection pool and tool catalog.
//!
//! Tool servers are stdio subprocesses configured via `mcp.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "fs": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "."],
//!       "env": { "TOKEN": "${FS_TOKEN}" }
//!     }
//!   }
//! }
//! ```
//!
//! # Tool Namespacing
//!
//! Tools are namespaced by server name with a double underscore:
//! `fs__list_dir`, `time__now`. Routing splits on that separator, so server
//! and tool names must not themselves contain `__`.

pub mod catalog;
pub mod config;
pub mod pool;

use serde_json::Value;

/// Dispatch seam between the conversation loop and one connected tool
/// server. [`pool::ServerConnection`] implements it over `rmcp`; tests
/// substitute in-process fakes.
#[async_trait::async_trait]
pub trait ToolServer: Send + Sync {
    /// Invoke `name` with JSON-object arguments, returning the raw result
    /// content items.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<Vec<Value>>;
}
