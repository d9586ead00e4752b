//! MCP server handler.
//!
//! Implements `rmcp::ServerHandler` with six tools over a shared [`Kernel`],
//! plus the registry docs as `sdk://` resources.

use std::sync::Arc;
use std::time::Duration;

use rmcp::ErrorData as McpError;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    Annotated, CallToolResult, Content, Implementation, ListResourcesResult, Meta, PaginatedRequestParam,
    ProtocolVersion, RawResource, ReadResourceRequestParam, ReadResourceResult, ResourceContents,
    ServerCapabilities, ServerInfo,
};
use rmcp::schemars::{self, JsonSchema};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_handler, tool_router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use scriptgate_kernel::{ExecutionRequest, Kernel, LookupError, overrides_from_meta};
use scriptgate_types::ExecutionReport;

use super::resources::{self, ResourceError};

/// The scriptgate MCP server handler.
#[derive(Clone)]
pub struct ScriptgateServer {
    kernel: Arc<Kernel>,
    tool_router: ToolRouter<Self>,
}

impl ScriptgateServer {
    pub fn new(kernel: Kernel) -> Self {
        Self::from_shared(Arc::new(kernel))
    }

    pub fn from_shared(kernel: Arc<Kernel>) -> Self {
        Self {
            kernel,
            tool_router: Self::tool_router(),
        }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Run a script with the credential overrides found in `auth`.
    pub async fn run_script(&self, input: ExecuteScriptInput, auth: &JsonValue) -> ExecutionReport {
        let mut request = ExecutionRequest::new(input.script).with_credentials(overrides_from_meta(auth));
        if let Some(ms) = input.timeout_ms {
            request = request.with_timeout(Duration::from_millis(ms));
        }
        let report = self.kernel.execute(request).await;
        match &report.failure {
            None => tracing::info!(
                api_calls = report.stats.api_calls,
                duration_ms = report.stats.duration_ms,
                "script finished"
            ),
            Some(failure) => tracing::info!(
                kind = ?failure.kind,
                api_calls = report.stats.api_calls,
                duration_ms = report.stats.duration_ms,
                "script failed"
            ),
        }
        report
    }

    fn instructions(&self) -> String {
        let registry = self.kernel.registry();
        let apis: Vec<String> = registry
            .list_apis()
            .into_iter()
            .map(|api| format!("• {} ({}, {} functions)", api.name, api.source, api.tool_count))
            .collect();
        let default_line = match registry.default_api() {
            Some(name) => format!("Functions of '{name}' are also callable bare as sdk.<function>.\n\n"),
            None => String::new(),
        };
        format!(
            "scriptgate: call REST APIs and MCP tools from one Luau script.\n\n\
             Loaded APIs:\n{}\n\n\
             Workflow:\n\
             1. list_apis / list_functions / search_docs to discover what exists\n\
             2. get_function_docs / get_schema to read signatures and types\n\
             3. execute_script to run Luau that calls sdk.<api>.<function>(args)\n\n\
             {default_line}\
             Scripts get print, json.encode/json.decode and (when enabled) file.save. \
             Errors from backends can be caught with pcall; timeouts and call limits cannot.",
            if apis.is_empty() { "• (none)".to_string() } else { apis.join("\n") },
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListFunctionsInput {
    #[schemars(description = "Only functions of this API")]
    pub api: Option<String>,
    #[schemars(description = "Only functions with this tag")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NameInput {
    #[schemars(description = "Function (`api.function`) or schema name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchInput {
    #[schemars(description = "Case-insensitive text to look for")]
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteScriptInput {
    #[schemars(description = "Luau script to execute. Its return value becomes `result`.")]
    pub script: String,
    #[schemars(description = "Timeout in milliseconds; can only lower the server's limit")]
    pub timeout_ms: Option<u64>,
}

fn json_text<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn lookup_result(outcome: Result<String, LookupError>) -> CallToolResult {
    match outcome {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
    }
}

#[tool_router]
impl ScriptgateServer {
    #[tool(description = "List loaded APIs (REST and MCP tool servers) with their function counts.")]
    async fn list_apis(&self) -> Result<CallToolResult, McpError> {
        json_text(&self.kernel.registry().list_apis())
    }

    #[tool(description = "List SDK functions, optionally filtered by API name or tag.")]
    async fn list_functions(&self, input: Parameters<ListFunctionsInput>) -> Result<CallToolResult, McpError> {
        let summaries = self
            .kernel
            .registry()
            .list_summaries(input.0.api.as_deref(), input.0.tag.as_deref());
        json_text(&summaries)
    }

    #[tool(description = "Get the LuaLS annotation docs for one function, named as list_functions returns it.")]
    async fn get_function_docs(&self, input: Parameters<NameInput>) -> Result<CallToolResult, McpError> {
        Ok(lookup_result(self.kernel.registry().get_docs(&input.0.name)))
    }

    #[tool(description = "Search function names, summaries, parameters and schemas.")]
    async fn search_docs(&self, input: Parameters<SearchInput>) -> Result<CallToolResult, McpError> {
        match self.kernel.registry().search(&input.0.query) {
            Ok(hits) => json_text(&hits),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    #[tool(description = "Get the LuaLS class annotation for a schema (request or response type).")]
    async fn get_schema(&self, input: Parameters<NameInput>) -> Result<CallToolResult, McpError> {
        Ok(lookup_result(self.kernel.registry().get_schema(&input.0.name)))
    }

    /// Per-call credentials come from the request's `_meta.auth`.
    #[tool(
        description = "Execute a Luau script against the SDK. Fresh isolated environment per call.\n\nCall functions as sdk.<api>.<function>({ param = value }). Returns JSON {result, logs, stats, files_written}; on failure also {error, kind}."
    )]
    async fn execute_script(
        &self,
        meta: Meta,
        input: Parameters<ExecuteScriptInput>,
    ) -> Result<CallToolResult, McpError> {
        let auth = meta.0.get("auth").cloned().unwrap_or(JsonValue::Null);
        let report = self.run_script(input.0, &auth).await;
        let text = serde_json::to_string_pretty(&report).map_err(|e| McpError::internal_error(e.to_string(), None))?;

        if report.is_success() {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }
}

#[tool_handler]
impl rmcp::ServerHandler for ScriptgateServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(self.instructions()),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let resources = resources::list_resources(self.kernel.registry())
            .into_iter()
            .map(|r| Annotated {
                raw: RawResource {
                    uri: r.uri,
                    name: r.name,
                    title: None,
                    description: r.description,
                    mime_type: Some("text/plain".to_string()),
                    size: None,
                    icons: None,
                    meta: None,
                },
                annotations: None,
            })
            .collect();

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let uri = request.uri.as_str();
        let text = resources::read_resource(self.kernel.registry(), uri).map_err(|e| match e {
            ResourceError::InvalidUri(_) => McpError::invalid_request(e.to_string(), None),
            _ => McpError::invalid_params(e.to_string(), None),
        })?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: uri.to_string(),
                mime_type: Some("text/plain".to_string()),
                text,
                meta: None,
            }],
        })
    }
}
