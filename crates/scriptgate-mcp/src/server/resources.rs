//! MCP resources: the registry's docs, readable by URI.
//!
//! ```text
//! sdk://{api}/overview             name, source, base URL, function count
//! sdk://{api}/functions            docs for every function of the API
//! sdk://{api}/functions/{name}     docs for one function (unqualified name)
//! sdk://{api}/schemas              every schema the API declares
//! sdk://{api}/schemas/{name}       one schema
//! ```

use std::fmt::Write;

use thiserror::Error;

use scriptgate_kernel::FunctionRegistry;
use scriptgate_kernel::registry::{render_function_docs, render_schema_docs};

pub const SCHEME: &str = "sdk://";

/// A resource as listed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkResource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("invalid resource URI: {0}")]
    InvalidUri(String),
    #[error("API '{0}' not found")]
    ApiNotFound(String),
    #[error("function '{0}' not found")]
    FunctionNotFound(String),
    #[error("schema '{0}' not found")]
    SchemaNotFound(String),
}

fn resource(uri: String, name: String, description: Option<String>) -> SdkResource {
    SdkResource { uri, name, description }
}

pub fn list_resources(registry: &FunctionRegistry) -> Vec<SdkResource> {
    let mut resources = Vec::new();
    for api in registry.list_apis() {
        let base = format!("{SCHEME}{}", api.name);
        resources.push(resource(
            format!("{base}/overview"),
            format!("{} overview", api.name),
            api.description.clone(),
        ));
        resources.push(resource(
            format!("{base}/functions"),
            format!("{} functions", api.name),
            Some(format!("Docs for every function of {}", api.name)),
        ));
        resources.push(resource(
            format!("{base}/schemas"),
            format!("{} schemas", api.name),
            Some(format!("Every schema {} declares", api.name)),
        ));
        for entry in registry.list(Some(&api.name), None) {
            resources.push(resource(
                format!("{base}/functions/{}", entry.name),
                entry.qualified_name.clone(),
                entry.summary.clone(),
            ));
        }
        for schema in registry.schemas().iter().filter(|s| s.api_name == api.name) {
            resources.push(resource(
                format!("{base}/schemas/{}", schema.name),
                schema.name.clone(),
                schema.description.clone(),
            ));
        }
    }
    resources
}

/// Text behind a resource URI.
pub fn read_resource(registry: &FunctionRegistry, uri: &str) -> Result<String, ResourceError> {
    let invalid = || ResourceError::InvalidUri(uri.to_string());
    let path = uri.strip_prefix(SCHEME).ok_or_else(invalid)?;
    let mut parts = path.splitn(3, '/');
    let api_name = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let api = registry
        .api(api_name)
        .ok_or_else(|| ResourceError::ApiNotFound(api_name.to_string()))?;

    match (parts.next(), parts.next()) {
        (Some("overview"), None) => {
            let mut text = format!("# {}\n\n", api.name);
            if let Some(description) = &api.description {
                let _ = write!(text, "{description}\n\n");
            }
            let _ = writeln!(text, "Source: {}", api.source);
            if let Some(base_url) = &api.base_url {
                let _ = writeln!(text, "Base URL: {base_url}");
            }
            let _ = writeln!(text, "Functions: {}", api.tool_count);
            Ok(text)
        }
        (Some("functions"), None) => Ok(registry
            .list(Some(api_name), None)
            .into_iter()
            .map(render_function_docs)
            .collect::<Vec<_>>()
            .join("\n\n")),
        (Some("functions"), Some(name)) => registry
            .list(Some(api_name), None)
            .into_iter()
            .find(|e| e.name == name)
            .map(render_function_docs)
            .ok_or_else(|| ResourceError::FunctionNotFound(format!("{api_name}.{name}"))),
        (Some("schemas"), None) => Ok(registry
            .schemas()
            .iter()
            .filter(|s| s.api_name == api_name)
            .map(render_schema_docs)
            .collect::<Vec<_>>()
            .join("\n\n")),
        (Some("schemas"), Some(name)) => registry
            .schemas()
            .iter()
            .find(|s| s.api_name == api_name && s.name == name)
            .map(render_schema_docs)
            .ok_or_else(|| ResourceError::SchemaNotFound(format!("{api_name}.{name}"))),
        _ => Err(invalid()),
    }
}
