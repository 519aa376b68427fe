//! Tool-server connection pool and lifecycle management.
//!
//! Servers start sequentially, one at a time, so a startup failure unwinds
//! deterministically: the first error closes everything created so far and
//! aborts the whole build. Cleanup failures are logged and swallowed so one
//! misbehaving subprocess cannot keep the rest alive.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, Ordering},
};
use std::time::Duration;

use anyhow::Context as _;
use rmcp::{model::CallToolRequestParam, service::ServiceExt, transport::TokioChildProcess};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::mcp::ToolServer;
use crate::mcp::config::{McpConfig, McpServerConfig, expand_env_map};

/// Bound on the MCP initialize handshake per server.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on one `tools/list` request per server.
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

type ClientService = rmcp::service::RunningService<
    rmcp::service::RoleClient,
    Box<dyn rmcp::service::DynService<rmcp::service::RoleClient>>,
>;

/// Release-once accounting of one live connection against the pool-wide
/// alive counter.
#[derive(Debug)]
struct AliveGuard {
    counter: Arc<AtomicI64>,
    released: AtomicBool,
}

impl AliveGuard {
    fn acquire(counter: &Arc<AtomicI64>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
            released: AtomicBool::new(false),
        }
    }

    /// Decrement the counter. Only the first call has any effect, so the
    /// counter never goes negative however many paths close a connection.
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// One live connection to a stdio MCP server.
pub struct ServerConnection {
    name: String,
    service: Mutex<Option<ClientService>>,
    guard: AliveGuard,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("name", &self.name)
            .finish()
    }
}

impl ServerConnection {
    fn new(name: String, service: ClientService, guard: AliveGuard) -> Self {
        Self {
            name,
            service: Mutex::new(Some(service)),
            guard,
        }
    }

    /// The configured server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// List this server's tools under [`LIST_TIMEOUT`].
    pub async fn list_tools(&self) -> anyhow::Result<Vec<rmcp::model::Tool>> {
        let service = self.service.lock().await;
        let Some(service) = service.as_ref() else {
            anyhow::bail!("MCP server '{}' is closed", self.name);
        };
        let result = timeout(LIST_TIMEOUT, service.list_tools(Default::default()))
            .await
            .map_err(|_| anyhow::anyhow!("tools/list timed out for MCP server '{}'", self.name))?
            .with_context(|| format!("tools/list failed for MCP server '{}'", self.name))?;
        Ok(result.tools)
    }

    /// Close the connection and release its alive slot.
    ///
    /// Idempotent: later calls find the service already taken and return
    /// immediately. Close failures are logged, never propagated.
    pub async fn close(&self) {
        if let Some(service) = self.service.lock().await.take() {
            if let Err(e) = service.cancel().await {
                tracing::warn!(server = %self.name, error = %e, "error while closing MCP server");
            } else {
                tracing::debug!(server = %self.name, "MCP server closed");
            }
        }
        self.guard.release();
    }
}

#[async_trait::async_trait]
impl ToolServer for ServerConnection {
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<Vec<Value>> {
        let service = self.service.lock().await;
        let Some(service) = service.as_ref() else {
            anyhow::bail!("MCP server '{}' is closed", self.name);
        };
        let result = service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .with_context(|| format!("tools/call failed for {}::{name}", self.name))?;

        result
            .content
            .into_iter()
            .map(|item| serde_json::to_value(item).map_err(Into::into))
            .collect()
    }
}

/// Pool of connected MCP servers, keyed by configured server name.
pub struct ServerPool {
    servers: HashMap<String, Arc<ServerConnection>>,
    alive: Arc<AtomicI64>,
}

impl std::fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPool")
            .field("server_count", &self.servers.len())
            .field("alive", &self.alive_count())
            .finish()
    }
}

impl ServerPool {
    /// Spawn and initialize every configured server, one at a time.
    ///
    /// Fatal on the first failure: every connection made so far is closed
    /// best-effort and the error names the failing server. Each registered
    /// connection also closes itself exactly once when `shutdown` is
    /// cancelled, independent of any explicit close elsewhere.
    pub async fn connect(
        config: &McpConfig,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<Self> {
        let alive = Arc::new(AtomicI64::new(0));
        let mut servers: HashMap<String, Arc<ServerConnection>> = HashMap::new();

        for (name, server) in &config.mcp_servers {
            let service = match Self::start_server(name, server).await {
                Ok(service) => service,
                Err(e) => {
                    Self::close_connections(servers.values()).await;
                    return Err(e);
                }
            };

            let connection = Arc::new(ServerConnection::new(
                name.clone(),
                service,
                AliveGuard::acquire(&alive),
            ));

            // Close-and-decrement once the governing lifetime signal fires,
            // whether or not anything else closed the connection first.
            let hook = Arc::clone(&connection);
            let token = shutdown.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                hook.close().await;
            });

            tracing::info!(server = %name, "MCP server connected");
            servers.insert(name.clone(), connection);
        }

        Ok(Self { servers, alive })
    }

    /// Spawn the subprocess and run the MCP initialize handshake under
    /// [`INIT_TIMEOUT`]. A timeout drops the transport, which reaps the
    /// child before it was ever registered.
    async fn start_server(name: &str, server: &McpServerConfig) -> anyhow::Result<ClientService> {
        let env = expand_env_map(&server.env);

        let mut cmd = Command::new(&server.command);
        cmd.args(&server.args);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .with_context(|| format!("failed to spawn MCP server '{name}'"))?;

        timeout(INIT_TIMEOUT, ().into_dyn().serve(transport))
            .await
            .map_err(|_| anyhow::anyhow!("initialize timed out for MCP server '{name}'"))?
            .with_context(|| format!("failed to initialize MCP server '{name}'"))
    }

    /// Live-connection count, lock-free. Reaches zero once every connection
    /// has released its slot after shutdown; external draining polls this.
    #[must_use]
    pub fn alive_count(&self) -> i64 {
        self.alive.load(Ordering::SeqCst)
    }

    /// List tools from every server, sequentially, each under its own
    /// timeout.
    ///
    /// The first failure closes the whole pool and is returned naming the
    /// failing server: an agent with a partially known toolset is worse
    /// than one that fails fast at startup, so partial catalogs are not
    /// supported.
    pub async fn list_all(&self) -> anyhow::Result<HashMap<String, Vec<rmcp::model::Tool>>> {
        let mut all = HashMap::new();
        for (name, connection) in &self.servers {
            match connection.list_tools().await {
                Ok(tools) => {
                    all.insert(name.clone(), tools);
                }
                Err(e) => {
                    self.close_all().await;
                    return Err(e);
                }
            }
        }
        Ok(all)
    }

    /// The dispatch map consumed by the conversation loop.
    #[must_use]
    pub fn tool_servers(&self) -> HashMap<String, Arc<dyn ToolServer>> {
        self.servers
            .iter()
            .map(|(name, connection)| {
                (name.clone(), Arc::clone(connection) as Arc<dyn ToolServer>)
            })
            .collect()
    }

    /// Close every registered connection, best-effort.
    pub async fn close_all(&self) {
        Self::close_connections(self.servers.values()).await;
    }

    async fn close_connections<'a>(connections: impl Iterator<Item = &'a Arc<ServerConnection>>) {
        for connection in connections {
            connection.close().await;
        }
    }
}
