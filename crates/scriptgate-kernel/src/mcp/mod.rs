//! MCP (Model Context Protocol) client integration.
//!
//! Connects to external tool servers at startup and turns their tool lists
//! into `ToolDescriptor`s for the function registry.
//!
//! # Architecture
//!
//! ```text
//! FunctionRegistry
//!     └── FunctionEntry (FunctionTarget::Tool)
//!             └── ToolBackend (dispatch)
//!                     └── McpClient (wraps rmcp RunningService)
//!                             └── MCP Server (stdio child process or HTTP)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use scriptgate_kernel::mcp::{connect_all, McpConfig, McpTransport};
//!
//! let clients = connect_all(vec![McpConfig {
//!     name: "git".to_string(),
//!     transport: McpTransport::Stdio {
//!         command: "uvx".to_string(),
//!         args: vec!["mcp-server-git".to_string()],
//!         env: vec![],
//!     },
//! }])
//! .await;
//! ```

mod client;
mod tool;

use std::sync::Arc;

use anyhow::Result;

use scriptgate_types::ToolDescriptor;

pub use client::{McpClient, McpConfig, McpTransport, http_client, shared_client, stdio_client};
pub use tool::{decode_result, descriptor_from_tool};

/// Connect to every configured server concurrently.
///
/// A server that fails to connect is logged and skipped; the rest still
/// come up. Returned clients keep configuration order.
pub async fn connect_all(configs: Vec<McpConfig>) -> Vec<Arc<McpClient>> {
    let attempts = configs.into_iter().map(|config| async move {
        let client = McpClient::new(config);
        match client.connect().await {
            Ok(()) => {
                tracing::info!(server = client.name(), "connected to MCP server");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!(server = client.name(), error = %e, "failed to connect to MCP server, skipping");
                None
            }
        }
    });

    futures::future::join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Discover a connected server's tools as registry descriptors.
pub async fn discover_tools(client: &McpClient) -> Result<Vec<ToolDescriptor>> {
    let tools = client.list_tools().await?;
    Ok(tools
        .iter()
        .map(|tool| descriptor_from_tool(client.name(), tool))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_client_creation() {
        let client = stdio_client("test-server", "echo", vec!["hello".to_string()]);
        assert_eq!(client.name(), "test-server");
    }

    #[tokio::test]
    async fn test_client_not_connected() {
        let client = stdio_client("test", "nonexistent", vec![]);

        let result = client.list_tools().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Not connected"));
    }

    #[tokio::test]
    async fn test_client_is_connected_false_initially() {
        let client = http_client("remote", "http://127.0.0.1:1/mcp");
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_all_skips_failures() {
        let clients = connect_all(vec![McpConfig {
            name: "broken".to_string(),
            transport: McpTransport::Stdio {
                command: "/nonexistent/scriptgate-test-binary".to_string(),
                args: vec![],
                env: vec![],
            },
        }])
        .await;
        assert!(clients.is_empty());
    }
}
