//! MCP client wrapper.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool as McpTool};
use rmcp::service::{RoleClient, RunningService, ServiceError, ServiceExt};
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;
use tokio::sync::RwLock;

/// Configuration for connecting to an MCP server.
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Backend name; tools appear under `sdk.<name>`.
    pub name: String,
    /// Transport configuration.
    pub transport: McpTransport,
}

/// Transport type for MCP connection.
#[derive(Debug, Clone)]
pub enum McpTransport {
    /// Stdio transport via child process.
    Stdio {
        /// Command to execute.
        command: String,
        /// Arguments to pass.
        args: Vec<String>,
        /// Environment variables.
        env: Vec<(String, String)>,
    },
    /// Streamable HTTP transport (also serves legacy event-stream URLs).
    Http {
        url: String,
    },
    /// A service connected by the caller; cannot be re-established.
    Preconnected,
}

/// The client role carries no handler state; we only issue requests.
type SharedService = Arc<RunningService<RoleClient, ()>>;

/// Client for communicating with an MCP server.
///
/// The service is wrapped in Arc so concurrent tool calls never hold the lock
/// across an await. rmcp tags each request with its own id, so interleaved
/// responses on one connection are routed back to the right caller.
pub struct McpClient {
    /// Server name for identification.
    name: String,
    /// The underlying rmcp running service, wrapped in Arc for sharing.
    service: RwLock<Option<SharedService>>,
    /// Cached tool list.
    tools: RwLock<Option<Vec<McpTool>>>,
    /// Transport config (for reconnection).
    config: McpConfig,
}

impl McpClient {
    /// Create a new MCP client from configuration.
    pub fn new(config: McpConfig) -> Self {
        Self {
            name: config.name.clone(),
            service: RwLock::new(None),
            tools: RwLock::new(None),
            config,
        }
    }

    /// Wrap a service that is already running, e.g. over an in-process pipe.
    pub fn from_service(name: impl Into<String>, service: RunningService<RoleClient, ()>) -> Self {
        let name = name.into();
        Self {
            service: RwLock::new(Some(Arc::new(service))),
            tools: RwLock::new(None),
            config: McpConfig {
                name: name.clone(),
                transport: McpTransport::Preconnected,
            },
            name,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &McpTransport {
        &self.config.transport
    }

    /// Connect to the MCP server.
    pub async fn connect(&self) -> Result<()> {
        let service = match &self.config.transport {
            McpTransport::Stdio { command, args, env } => {
                let env_clone = env.clone();
                let args_clone = args.clone();

                let transport = TokioChildProcess::new(
                    Command::new(command).configure(move |cmd| {
                        cmd.args(&args_clone);
                        for (key, value) in &env_clone {
                            cmd.env(key, value);
                        }
                    }),
                )
                .context("Failed to create child process transport")?;

                ().serve(transport)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to initialize MCP connection: {}", e))?
            }
            McpTransport::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                ().serve(transport)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to initialize MCP connection to {}: {}", url, e))?
            }
            McpTransport::Preconnected => {
                anyhow::bail!("MCP server '{}' was connected externally and cannot reconnect", self.name)
            }
        };

        *self.service.write().await = Some(Arc::new(service));
        Ok(())
    }

    /// Disconnect from the MCP server.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(service) = self.service.write().await.take() {
            // If other calls still hold the Arc, they finish on the old service.
            if let Ok(service) = Arc::try_unwrap(service) {
                service
                    .cancel()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to cancel service: {}", e))?;
            }
        }
        *self.tools.write().await = None;
        Ok(())
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        self.service.read().await.is_some()
    }

    /// List available tools from the MCP server.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        if let Some(tools) = self.tools.read().await.as_ref() {
            return Ok(tools.clone());
        }

        self.refresh_tools().await
    }

    /// Refresh the tool cache from the MCP server.
    pub async fn refresh_tools(&self) -> Result<Vec<McpTool>> {
        let service = self.current_service().await?;

        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list tools: {}", e))?;

        *self.tools.write().await = Some(tools.clone());

        Ok(tools)
    }

    /// Call a tool on the MCP server.
    ///
    /// A transport-level failure triggers one reconnect and one retry.
    /// Protocol errors are returned as-is.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult> {
        let service = self.current_service().await?;

        match Self::call_once(&service, name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(e) if is_transport_error(&e) && self.can_reconnect() => {
                tracing::warn!(server = %self.name, error = %e, "MCP transport failed, reconnecting");
                drop(service);
                self.connect()
                    .await
                    .with_context(|| format!("Failed to reconnect to MCP server '{}'", self.name))?;
                let service = self.current_service().await?;
                Self::call_once(&service, name, arguments)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to call tool after reconnect: {}", e))
            }
            Err(e) => Err(anyhow::anyhow!("Failed to call tool: {}", e)),
        }
    }

    /// Instructions the server sent during initialization, if any.
    pub async fn instructions(&self) -> Option<String> {
        let service = self.current_service().await.ok()?;
        service.peer_info().and_then(|info| info.instructions.clone())
    }

    /// Clone the Arc and release the lock immediately.
    async fn current_service(&self) -> Result<SharedService> {
        Ok(self
            .service
            .read()
            .await
            .as_ref()
            .context("Not connected to MCP server")?
            .clone())
    }

    fn can_reconnect(&self) -> bool {
        !matches!(self.config.transport, McpTransport::Preconnected)
    }

    async fn call_once(
        service: &SharedService,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> std::result::Result<CallToolResult, ServiceError> {
        service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
    }
}

/// Failures where the connection itself is gone, as opposed to the server
/// answering with an error.
fn is_transport_error(e: &ServiceError) -> bool {
    matches!(e, ServiceError::TransportSend(_) | ServiceError::TransportClosed)
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Create an McpClient from a stdio command.
pub fn stdio_client(
    name: impl Into<String>,
    command: impl Into<String>,
    args: Vec<String>,
) -> McpClient {
    McpClient::new(McpConfig {
        name: name.into(),
        transport: McpTransport::Stdio {
            command: command.into(),
            args,
            env: Vec::new(),
        },
    })
}

/// Create an McpClient for a streamable HTTP endpoint.
pub fn http_client(name: impl Into<String>, url: impl Into<String>) -> McpClient {
    McpClient::new(McpConfig {
        name: name.into(),
        transport: McpTransport::Http { url: url.into() },
    })
}

/// Wrap an McpClient in an Arc for sharing.
pub fn shared_client(client: McpClient) -> Arc<McpClient> {
    Arc::new(client)
}
