//! MCP agent host.
//!
//! Mediates a conversation between a language-model backend and a dynamic
//! set of MCP tool-server subprocesses: tool calls requested by the model
//! are routed to the owning server process and the results are fed back
//! until the model produces a final answer.
//!
//! # Architecture
//!
//! - **Connection pool**: one stdio MCP client per configured server, with
//!   lifecycle accounting and cancellation-driven teardown
//! - **Tool catalog**: every server's tools flattened into one namespaced
//!   list (`<server>__<tool>`)
//! - **Orchestrator**: the conversation loop that calls the provider,
//!   dispatches tool calls and terminates on a turn with no tool calls
//!
//! # Modules
//!
//! - [`llm`]: provider contract, chat-completions adapter and orchestrator
//! - [`mcp`]: server config, connection pool and tool catalog
//! - [`history`]: append-only conversation history blocks
//! - [`config`]: CLI flags and model settings

pub mod config;
pub mod history;
pub mod llm;
pub mod mcp;
