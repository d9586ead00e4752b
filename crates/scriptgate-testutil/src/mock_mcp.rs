//! In-process mock MCP server.
//!
//! Tools cover the shapes the gateway has to handle: strings, integers,
//! optional flags with defaults, list results, no parameters, a tool that
//! always reports an error, and one that takes as long as it is told to.

use std::time::Duration;

use anyhow::{Context, Result};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::schemars::{self, JsonSchema};
use rmcp::service::{RoleClient, RunningService};
use rmcp::{ErrorData as McpError, ServiceExt, tool, tool_handler, tool_router};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoInput {
    #[schemars(description = "Text to echo")]
    pub text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddInput {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetUserInput {
    #[schemars(description = "User identifier")]
    pub user_id: String,
    #[serde(default)]
    #[schemars(description = "Include the user's email address")]
    pub include_email: bool,
}

fn default_limit() -> u32 {
    10
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListItemsInput {
    pub category: String,
    #[serde(default = "default_limit")]
    #[schemars(description = "Maximum number of items")]
    pub limit: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SleepInput {
    #[schemars(description = "Milliseconds to wait before answering")]
    pub ms: u64,
}

/// Mock tool server exposed as `mock` in tests.
#[derive(Clone)]
pub struct MockToolServer {
    tool_router: ToolRouter<Self>,
}

impl Default for MockToolServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolServer {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl MockToolServer {
    #[tool(description = "Echo back the input text.")]
    async fn echo(&self, input: Parameters<EchoInput>) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(input.0.text)]))
    }

    #[tool(description = "Add two numbers together.")]
    async fn add(&self, input: Parameters<AddInput>) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::structured(json!(input.0.a + input.0.b)))
    }

    #[tool(description = "Look up a user by ID.")]
    async fn get_user(&self, input: Parameters<GetUserInput>) -> Result<CallToolResult, McpError> {
        let mut user = json!({ "id": input.0.user_id, "name": "Alice" });
        if input.0.include_email {
            user["email"] = json!("alice@example.com");
        }
        Ok(CallToolResult::success(vec![Content::json(user)?]))
    }

    #[tool(description = "List items in a category.")]
    async fn list_items(&self, input: Parameters<ListItemsInput>) -> Result<CallToolResult, McpError> {
        let items: Vec<_> = (0..input.0.limit.min(3))
            .map(|i| json!({ "id": i.to_string(), "name": format!("{}-{i}", input.0.category) }))
            .collect();
        Ok(CallToolResult::success(vec![Content::json(items)?]))
    }

    #[tool(description = "A tool that always fails.")]
    async fn failing_tool(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::error(vec![Content::text("intentional failure")]))
    }

    #[tool(description = "A tool with no parameters.")]
    async fn no_params(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text("ok")]))
    }

    #[tool(description = "Wait, then answer.")]
    async fn sleep(&self, input: Parameters<SleepInput>) -> Result<CallToolResult, McpError> {
        tokio::time::sleep(Duration::from_millis(input.0.ms)).await;
        Ok(CallToolResult::success(vec![Content::text("awake")]))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for MockToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Mock tools for scriptgate tests.".to_string()),
        }
    }
}

/// Start a [`MockToolServer`] on a duplex pipe and return the connected
/// client side. The server task ends when the client is dropped.
pub async fn connect_mock_server() -> Result<RunningService<RoleClient, ()>> {
    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let (read, write) = tokio::io::split(server_stream);
        match MockToolServer::new().serve((read, write)).await {
            Ok(service) => {
                let _ = service.waiting().await;
            }
            Err(e) => tracing::warn!(error = %e, "mock MCP server failed to start"),
        }
    });

    let (read, write) = tokio::io::split(client_stream);
    ().serve((read, write))
        .await
        .context("failed to connect to mock MCP server")
}
