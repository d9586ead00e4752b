//! Tool-server dispatch over an MCP client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use scriptgate_types::{Credential, DispatchError, FunctionEntry, UpstreamError};

use super::{Backend, BoundCall};
use crate::mcp::{McpClient, decode_result};

/// Dispatches tools of one connected MCP server.
#[derive(Debug, Clone)]
pub struct ToolBackend {
    client: Arc<McpClient>,
}

impl ToolBackend {
    pub fn new(client: Arc<McpClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }
}

#[async_trait]
impl Backend for ToolBackend {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn invoke(
        &self,
        entry: &FunctionEntry,
        call: BoundCall,
        _credential: &Credential,
    ) -> Result<JsonValue, DispatchError> {
        let result = self
            .client
            .call_tool(&entry.name, Some(call.params))
            .await
            .map_err(|e| UpstreamError::tool(&entry.qualified_name, format!("{e:#}")))?;

        Ok(decode_result(&entry.qualified_name, result)?)
    }
}
