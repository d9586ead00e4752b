//! The registry's unified view of callables and the backends they come from.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::operation::{Operation, ParamSpec};
use crate::tool::ToolDescriptor;

/// Which kind of backend a function dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionSource {
    Rest,
    Tool,
}

impl FunctionSource {
    /// Label used by `list_functions`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Tool => "tool",
        }
    }

    /// Label used by `search_docs` result types.
    pub fn search_type(&self) -> &'static str {
        match self {
            Self::Rest => "function",
            Self::Tool => "mcp_tool",
        }
    }
}

/// Kind of a configured backend, as `list_apis` reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKind {
    Rest,
    ToolProtocol,
}

impl ApiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::ToolProtocol => "tool_protocol",
        }
    }

    /// Function source of every entry this kind of backend contributes.
    pub fn function_source(&self) -> FunctionSource {
        match self {
            Self::Rest => FunctionSource::Rest,
            Self::ToolProtocol => FunctionSource::Tool,
        }
    }
}

/// How the gateway reaches a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SourceTransport {
    /// REST API rooted at a base URL.
    Rest { base_url: String },
    /// Tool server spawned as a child process speaking over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Tool server reached over streamable HTTP.
    Http { url: String },
    /// Tool server connected by the embedder, e.g. over an in-process pipe.
    InProcess,
}

/// Environment variables a backend's process-level credentials come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl CredentialBinding {
    /// Conventional variable names for an API: `<API>_BEARER_TOKEN` and
    /// `<API>_API_KEY`, with the name upper-cased and non-alphanumerics
    /// replaced by `_`.
    pub fn conventional(api_name: &str) -> Self {
        let prefix: String = api_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        Self {
            bearer_env: Some(format!("{prefix}_BEARER_TOKEN")),
            api_key_env: Some(format!("{prefix}_API_KEY")),
        }
    }
}

/// One configured backend. Created at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSource {
    pub name: String,
    pub kind: ApiKind,
    pub transport: SourceTransport,
    #[serde(default)]
    pub credential_binding: CredentialBinding,
    #[serde(default)]
    pub description: Option<String>,
}

/// What a registry entry dispatches to.
///
/// The registry and bridge only look at this tag to pick a dispatch path.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionTarget {
    Rest(Arc<Operation>),
    Tool(Arc<ToolDescriptor>),
}

/// The registry's unifying, source-tagged view of a callable.
///
/// Unique per `(api_name, name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionEntry {
    /// `api.name`, or the bare name for the default API.
    pub qualified_name: String,
    pub api_name: String,
    pub name: String,
    pub source: FunctionSource,
    /// One-line summary for listings.
    pub summary: Option<String>,
    /// Longer description, searched and rendered in docs.
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Script-visible parameters.
    pub params: Vec<ParamSpec>,
    pub target: FunctionTarget,
}

impl FunctionEntry {
    /// Entry for a REST operation.
    pub fn from_operation(operation: Arc<Operation>, is_default_api: bool) -> Self {
        let qualified_name = if is_default_api {
            operation.name.clone()
        } else {
            format!("{}.{}", operation.api_name, operation.name)
        };
        Self {
            qualified_name,
            api_name: operation.api_name.clone(),
            name: operation.name.clone(),
            source: FunctionSource::Rest,
            summary: operation.summary.clone(),
            description: operation.description.clone(),
            tags: operation.tags.clone(),
            params: operation.visible_params().cloned().collect(),
            target: FunctionTarget::Rest(operation),
        }
    }

    /// Entry for a discovered tool. Tool servers are never the default API.
    pub fn from_tool(tool: Arc<ToolDescriptor>) -> Self {
        Self {
            qualified_name: format!("{}.{}", tool.api_name, tool.name),
            api_name: tool.api_name.clone(),
            name: tool.name.clone(),
            source: FunctionSource::Tool,
            summary: tool
                .description
                .as_deref()
                .and_then(|d| d.lines().next())
                .map(String::from),
            description: tool.description.clone(),
            tags: Vec::new(),
            params: tool.params.clone(),
            target: FunctionTarget::Tool(tool),
        }
    }

    /// Whether the entry is bound directly under `sdk` rather than in its
    /// API's table.
    pub fn is_bare(&self) -> bool {
        self.qualified_name == self.name
    }

    /// Response shape, when the source declares one.
    pub fn response_shape(&self) -> Option<&str> {
        match &self.target {
            FunctionTarget::Rest(op) => op.response_shape.as_deref(),
            FunctionTarget::Tool(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::HttpMethod;

    fn op(api: &str, name: &str) -> Arc<Operation> {
        Arc::new(Operation {
            name: name.to_string(),
            api_name: api.to_string(),
            http_method: HttpMethod::Get,
            path_template: "/pets".to_string(),
            parameters: vec![],
            request_body: None,
            response_shape: None,
            summary: Some("List pets".to_string()),
            description: None,
            tags: vec!["pets".to_string()],
            deprecated: false,
        })
    }

    #[test]
    fn test_qualified_names() {
        let bare = FunctionEntry::from_operation(op("petstore", "list_pets"), true);
        assert_eq!(bare.qualified_name, "list_pets");
        assert!(bare.is_bare());

        let qualified = FunctionEntry::from_operation(op("petstore", "list_pets"), false);
        assert_eq!(qualified.qualified_name, "petstore.list_pets");
        assert!(!qualified.is_bare());
    }

    #[test]
    fn test_conventional_binding() {
        let binding = CredentialBinding::conventional("test-api");
        assert_eq!(binding.bearer_env.as_deref(), Some("TEST_API_BEARER_TOKEN"));
        assert_eq!(binding.api_key_env.as_deref(), Some("TEST_API_API_KEY"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(FunctionSource::Tool.as_str(), "tool");
        assert_eq!(FunctionSource::Tool.search_type(), "mcp_tool");
        assert_eq!(ApiKind::ToolProtocol.as_str(), "tool_protocol");
    }
}
