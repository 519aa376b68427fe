//! CLI flags and model settings.

use clap::Parser;

use crate::llm::LlmSettings;

/// Run a tool-calling conversation against the configured MCP servers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Prompt to start the conversation with.
    pub prompt: String,

    /// Path to the MCP server config file.
    #[arg(short, long, env = "MCP_CONFIG", default_value = "mcp.json")]
    pub config: String,
}

/// Load model settings from the environment (`.env` is loaded by the
/// caller via dotenvy before this runs).
pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model =
        std::env::var("LLM_MODEL").map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
    })
}
