//! Function registry: one namespace over every configured backend.
//!
//! REST operations and discovered tools are merged into `FunctionEntry`s
//! keyed by qualified name. The registry is assembled once by
//! `RegistryBuilder` after every source has been discovered, and is
//! read-only from then on.
//!
//! # Naming
//!
//! ```text
//! sdk.list_pets            default API (bare name)
//! sdk.petstore.list_pets   same function, qualified
//! sdk.mock.echo            tool server (always qualified)
//! ```

mod docs;
mod search;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use scriptgate_types::{
    ApiKind, FunctionEntry, FunctionSource, SchemaDef, ToolDescriptor,
};

use crate::catalog::ApiCatalog;

pub use docs::{render_function_docs, render_schema_docs, signature};
pub use search::{MatchType, SearchHit};

/// Errors while assembling the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("API '{0}' is configured more than once")]
    DuplicateApi(String),
    #[error("default API '{0}' is not a configured REST API")]
    UnknownDefaultApi(String),
    #[error("function '{name}' of default API '{api}' would shadow the '{name}' backend")]
    NameCollision { name: String, api: String },
}

/// Lookup failures reported by discovery tools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("function '{0}' not found")]
    FunctionNotFound(String),
    #[error("schema '{0}' not found")]
    SchemaNotFound(String),
    #[error("'{name}' is ambiguous, use one of: {}", candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },
    #[error("search query must not be empty")]
    EmptyQuery,
}

/// One configured backend as `list_apis` describes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiSummary {
    pub name: String,
    pub source: &'static str,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// One row of `list_functions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub api: String,
    pub source: &'static str,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl FunctionSummary {
    fn from_entry(entry: &FunctionEntry) -> Self {
        Self {
            name: entry.qualified_name.clone(),
            api: entry.api_name.clone(),
            source: entry.source.as_str(),
            signature: signature(entry),
            summary: entry.summary.clone(),
            tags: entry.tags.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct ApiInfo {
    name: String,
    kind: ApiKind,
    description: Option<String>,
    base_url: Option<String>,
}

/// Accumulates discovered sources, then publishes a `FunctionRegistry`.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    default_api: Option<String>,
    rest: Vec<ApiCatalog>,
    tools: Vec<(String, Option<String>, Vec<ToolDescriptor>)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// API whose functions are also bound under bare names.
    pub fn default_api(mut self, name: Option<String>) -> Self {
        self.default_api = name;
        self
    }

    pub fn rest_api(mut self, catalog: ApiCatalog) -> Self {
        self.rest.push(catalog);
        self
    }

    pub fn tool_server(
        mut self,
        name: impl Into<String>,
        description: Option<String>,
        tools: Vec<ToolDescriptor>,
    ) -> Self {
        self.tools.push((name.into(), description, tools));
        self
    }

    /// Resolve the default API: the configured one, or the only REST API.
    fn resolve_default(&self) -> Result<Option<String>, RegistryError> {
        match &self.default_api {
            Some(name) => {
                if self.rest.iter().any(|c| &c.config.name == name) {
                    Ok(Some(name.clone()))
                } else {
                    Err(RegistryError::UnknownDefaultApi(name.clone()))
                }
            }
            None if self.rest.len() == 1 => Ok(self.rest.first().map(|c| c.config.name.clone())),
            None => Ok(None),
        }
    }

    /// Build the registry. REST APIs come first in configuration order,
    /// then tool servers.
    pub fn build(self) -> Result<FunctionRegistry, RegistryError> {
        let default_api = self.resolve_default()?;

        let mut seen = HashSet::new();
        let api_names = self
            .rest
            .iter()
            .map(|c| c.config.name.as_str())
            .chain(self.tools.iter().map(|(name, _, _)| name.as_str()));
        for name in api_names {
            if !seen.insert(name.to_string()) {
                return Err(RegistryError::DuplicateApi(name.to_string()));
            }
        }

        let mut registry = FunctionRegistry {
            default_api: default_api.clone(),
            ..Default::default()
        };

        for catalog in self.rest {
            let is_default = default_api.as_deref() == Some(catalog.config.name.as_str());
            registry.apis.push(ApiInfo {
                name: catalog.config.name.clone(),
                kind: ApiKind::Rest,
                description: catalog.config.description.clone(),
                base_url: Some(catalog.config.base_url.clone()),
            });
            for op in catalog.operations {
                if is_default && seen.contains(&op.name) {
                    return Err(RegistryError::NameCollision {
                        name: op.name,
                        api: catalog.config.name,
                    });
                }
                registry.insert(FunctionEntry::from_operation(Arc::new(op), is_default));
            }
            registry.schemas.extend(catalog.schemas);
        }

        for (name, description, tools) in self.tools {
            registry.apis.push(ApiInfo {
                name: name.clone(),
                kind: ApiKind::ToolProtocol,
                description,
                base_url: None,
            });
            for tool in tools {
                registry.schemas.extend(tool.schema_defs());
                registry.insert(FunctionEntry::from_tool(Arc::new(tool)));
            }
        }

        tracing::info!(
            apis = registry.apis.len(),
            functions = registry.entries.len(),
            schemas = registry.schemas.len(),
            default_api = ?registry.default_api,
            "function registry built"
        );
        Ok(registry)
    }
}

/// Read-only namespace of every callable the sandbox can bind.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    apis: Vec<ApiInfo>,
    entries: Vec<FunctionEntry>,
    index: HashMap<String, usize>,
    schemas: Vec<SchemaDef>,
    default_api: Option<String>,
}

impl FunctionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    fn insert(&mut self, entry: FunctionEntry) {
        if self.index.contains_key(&entry.qualified_name) {
            tracing::warn!(function = %entry.qualified_name, "duplicate function name, keeping the first");
            return;
        }
        self.index.insert(entry.qualified_name.clone(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn default_api(&self) -> Option<&str> {
        self.default_api.as_deref()
    }

    /// Every entry in registration order.
    pub fn entries(&self) -> &[FunctionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured API names in registration order, with their kind.
    pub fn api_names(&self) -> impl Iterator<Item = (&str, ApiKind)> {
        self.apis.iter().map(|a| (a.name.as_str(), a.kind))
    }

    /// Look up by qualified name. `api.name` also resolves for the default
    /// API, whose entries are keyed by bare name.
    pub fn get(&self, qualified_name: &str) -> Option<&FunctionEntry> {
        if let Some(&i) = self.index.get(qualified_name) {
            return self.entries.get(i);
        }
        let default = self.default_api.as_deref()?;
        let bare = qualified_name.strip_prefix(default)?.strip_prefix('.')?;
        self.index.get(bare).and_then(|&i| self.entries.get(i))
    }

    /// Entries filtered by API and tag, in registration order.
    pub fn list(&self, api: Option<&str>, tag: Option<&str>) -> Vec<&FunctionEntry> {
        self.entries
            .iter()
            .filter(|e| api.is_none_or(|a| e.api_name == a))
            .filter(|e| tag.is_none_or(|t| e.tags.iter().any(|et| et == t)))
            .collect()
    }

    pub fn list_summaries(&self, api: Option<&str>, tag: Option<&str>) -> Vec<FunctionSummary> {
        self.list(api, tag)
            .into_iter()
            .map(FunctionSummary::from_entry)
            .collect()
    }

    /// Configured backends with their function counts.
    pub fn list_apis(&self) -> Vec<ApiSummary> {
        self.apis
            .iter()
            .map(|api| ApiSummary {
                name: api.name.clone(),
                source: api.kind.as_str(),
                tool_count: self.list(Some(&api.name), None).len(),
                description: api.description.clone(),
                base_url: api.base_url.clone(),
            })
            .collect()
    }

    /// Case-insensitive search over function names, summaries, descriptions
    /// and parameters, and over schema names, descriptions and fields. Name
    /// matches rank first.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>, LookupError> {
        search::search(&self.entries, &self.schemas, query)
    }

    /// Every named data shape, in registration order.
    pub fn schemas(&self) -> &[SchemaDef] {
        &self.schemas
    }

    /// One configured backend, as `list_apis` describes it.
    pub fn api(&self, name: &str) -> Option<ApiSummary> {
        self.list_apis().into_iter().find(|a| a.name == name)
    }

    /// Resolve a qualified name, or a bare name when only one API has it.
    pub fn resolve(&self, name: &str) -> Result<&FunctionEntry, LookupError> {
        if let Some(entry) = self.get(name) {
            return Ok(entry);
        }
        let matches: Vec<&FunctionEntry> =
            self.entries.iter().filter(|e| e.name == name).collect();
        match matches.as_slice() {
            [] => Err(LookupError::FunctionNotFound(name.to_string())),
            [only] => Ok(only),
            many => Err(LookupError::Ambiguous {
                name: name.to_string(),
                candidates: many.iter().map(|e| e.qualified_name.clone()).collect(),
            }),
        }
    }

    /// Rendered docs for one function.
    pub fn get_docs(&self, name: &str) -> Result<String, LookupError> {
        self.resolve(name).map(render_function_docs)
    }

    /// Look up a named data shape. `api.Name` picks one API's schema when
    /// several declare the same name.
    pub fn schema(&self, name: &str) -> Result<&SchemaDef, LookupError> {
        if let Some(found) = self.schemas.iter().find(|s| s.name == name) {
            return Ok(found);
        }
        name.split_once('.')
            .and_then(|(api, schema)| {
                self.schemas
                    .iter()
                    .find(|s| s.api_name == api && s.name == schema)
            })
            .ok_or_else(|| LookupError::SchemaNotFound(name.to_string()))
    }

    /// Rendered docs for one data shape.
    pub fn get_schema(&self, name: &str) -> Result<String, LookupError> {
        self.schema(name).map(render_schema_docs)
    }

    /// Number of entries per source kind.
    pub fn count_by_source(&self, source: FunctionSource) -> usize {
        self.entries.iter().filter(|e| e.source == source).count()
    }
}
