//! MCP agent host entry point.
//!
//! Wires the pieces together: load config, connect the server pool, build
//! the catalog, run one conversation, then drain the pool.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_agent::config::{Cli, load_llm_settings};
use mcp_agent::llm::{ChatCompletionsProvider, Orchestrator, Provider};
use mcp_agent::mcp::catalog;
use mcp_agent::mcp::config::load_mcp_config;
use mcp_agent::mcp::pool::ServerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();

    let settings = match load_llm_settings() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };

    info!(
        base_url = %settings.base_url,
        model = %settings.model,
        "LLM configuration loaded"
    );

    // Governing lifetime signal: an interrupt closes every MCP connection,
    // whether or not the conversation is still running.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down MCP servers");
                shutdown.cancel();
            }
        });
    }

    let mcp_config = load_mcp_config(&cli.config)?;
    let pool = ServerPool::connect(&mcp_config, &shutdown).await?;

    let mut tools = Vec::new();
    for (server_name, server_tools) in pool.list_all().await? {
        tools.extend(catalog::flatten(&server_name, &server_tools));
    }
    for tool in &tools {
        info!(tool = %tool.name, "MCP tool discovered");
    }

    let provider: Arc<dyn Provider> = Arc::new(ChatCompletionsProvider::new(settings));
    let mut orchestrator = Orchestrator::new(provider, pool.tool_servers(), tools);

    let outcome = orchestrator.run(&cli.prompt).await;

    // Drain: fire the lifetime signal ourselves, then wait for every
    // connection to release its alive slot.
    shutdown.cancel();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let alive = pool.alive_count();
        if alive == 0 {
            info!("all MCP servers shut down");
            break;
        }
        info!(alive, "waiting for MCP servers to shut down");
    }

    match outcome {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
