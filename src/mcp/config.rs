//! MCP server configuration file handling.

use std::{collections::HashMap, fs, path::Path};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Top-level MCP configuration file: `{"mcpServers": {...}}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct McpConfig {
    /// Configured tool servers, keyed by unique server name.
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

/// One stdio tool-server entry: the subprocess to spawn and its
/// environment. Immutable once loaded.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct McpServerConfig {
    /// Executable to spawn.
    pub command: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the subprocess; values may use `${VAR}`
    /// placeholders.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Load and validate the MCP configuration.
///
/// An empty server set is a configuration error: the agent would have no
/// tools at all.
pub fn load_mcp_config(path: impl AsRef<Path>) -> anyhow::Result<McpConfig> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path)
        .with_context(|| format!("failed to read MCP config {}", path.display()))?;
    let config: McpConfig = serde_json::from_str(&txt)
        .with_context(|| format!("failed to parse MCP config {}", path.display()))?;
    if config.mcp_servers.is_empty() {
        anyhow::bail!("no MCP servers found in {}", path.display());
    }
    Ok(config)
}

/// Expand `${VAR}` placeholders from the process environment.
/// Missing variables leave the placeholder unchanged.
#[must_use]
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = input.to_string();
    for (k, v) in std::env::vars() {
        let needle = format!("${{{k}}}");
        if out.contains(&needle) {
            out = out.replace(&needle, &v);
        }
    }
    out
}

/// Expand every value of an environment map.
#[must_use]
pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn parses_server_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mcpServers": {{"fs": {{"command": "mcp-fs", "args": ["--root", "."], "env": {{"TOKEN": "abc"}}}}}}}}"#
        )
        .unwrap();

        let config = load_mcp_config(file.path()).unwrap();
        let fs = &config.mcp_servers["fs"];
        assert_eq!(fs.command, "mcp-fs");
        assert_eq!(fs.args, vec!["--root", "."]);
        assert_eq!(fs.env["TOKEN"], "abc");
    }

    #[test]
    fn args_and_env_default_to_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mcpServers": {{"t": {{"command": "mcp-time"}}}}}}"#).unwrap();

        let config = load_mcp_config(file.path()).unwrap();
        let t = &config.mcp_servers["t"];
        assert!(t.args.is_empty());
        assert!(t.env.is_empty());
    }

    #[test]
    fn empty_server_set_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mcpServers": {{}}}}"#).unwrap();

        let err = load_mcp_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("no MCP servers"));
    }

    #[test]
    fn expands_placeholders_and_leaves_missing_ones() {
        // SAFETY: test-only env mutation; no other thread reads this name.
        unsafe {
            std::env::set_var("MCP_AGENT_TEST_TOKEN", "sekrit");
        }

        let mut map = HashMap::new();
        map.insert("TOKEN".to_string(), "${MCP_AGENT_TEST_TOKEN}".to_string());
        map.insert(
            "OTHER".to_string(),
            "${MCP_AGENT_TEST_MISSING_VAR}".to_string(),
        );

        let expanded = expand_env_map(&map);
        assert_eq!(expanded["TOKEN"], "sekrit");
        assert_eq!(expanded["OTHER"], "${MCP_AGENT_TEST_MISSING_VAR}");
    }
}
