//! Operation catalog: OpenAPI 3 documents to `Operation` records.
//!
//! The catalog reads an interface document (JSON or YAML, from a file or an
//! http(s) URL) and produces one `Operation` per endpoint, the document's
//! named schemas, and the API's base URL and declared auth scheme.
//!
//! ```text
//! document ──► parse_text ──► openapi::parse_document ──► ApiCatalog
//!                                  │                         ├── ApiConfig
//!                                  │                         ├── Vec<Operation>
//!                                  └── options (base_url,    └── Vec<SchemaDef>
//!                                      frozen params)
//! ```

mod openapi;

use std::collections::HashMap;

use scriptgate_types::{ApiConfig, Operation, SchemaDef};
use thiserror::Error;

/// Errors while loading an interface document.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("document is neither valid JSON nor YAML: {0}")]
    Parse(String),
    #[error("unsupported document: {0}")]
    Unsupported(String),
    #[error("invalid document: {0}")]
    Invalid(String),
}

/// Per-API knobs applied while building the catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    /// Replaces the document's `servers[0].url`.
    pub base_url: Option<String>,
    /// Where the document came from, for resolving a relative server URL.
    pub document_url: Option<String>,
    /// Parameters pinned to a value and hidden from scripts.
    pub frozen_params: HashMap<String, String>,
}

/// Everything one interface document contributes to the registry.
#[derive(Debug, Clone)]
pub struct ApiCatalog {
    pub config: ApiConfig,
    pub operations: Vec<Operation>,
    pub schemas: Vec<SchemaDef>,
}

impl ApiCatalog {
    /// Build a catalog from an already-parsed document.
    pub fn from_document(
        api_name: &str,
        document: &serde_json::Value,
        options: &CatalogOptions,
    ) -> Result<Self, CatalogError> {
        openapi::parse_document(api_name, document, options)
    }

    /// Parse document text (JSON first, then YAML) and build a catalog.
    pub fn from_text(
        api_name: &str,
        text: &str,
        options: &CatalogOptions,
    ) -> Result<Self, CatalogError> {
        let document = parse_text(text)?;
        Self::from_document(api_name, &document, options)
    }

    /// Load a document from a file path or an http(s) URL.
    pub async fn load(
        api_name: &str,
        location: &str,
        options: CatalogOptions,
    ) -> Result<Self, CatalogError> {
        let mut options = options;
        let text = if is_url(location) {
            options.document_url.get_or_insert_with(|| location.to_string());
            fetch(location).await?
        } else {
            tokio::fs::read_to_string(location)
                .await
                .map_err(|e| CatalogError::Read {
                    path: location.to_string(),
                    message: e.to_string(),
                })?
        };

        let catalog = Self::from_text(api_name, &text, &options)?;
        tracing::info!(
            api = api_name,
            operations = catalog.operations.len(),
            schemas = catalog.schemas.len(),
            base_url = %catalog.config.base_url,
            "loaded interface document"
        );
        Ok(catalog)
    }
}

/// Default API name for a document given without one: the file stem or
/// last URL path segment, in identifier form. `./specs/pet-store.yaml` gives
/// `pet_store`.
pub fn api_name_from_location(location: &str) -> String {
    let path = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location)
        .trim_end_matches('/');
    let last = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = last
        .strip_suffix(".json")
        .or_else(|| last.strip_suffix(".yaml"))
        .or_else(|| last.strip_suffix(".yml"))
        .unwrap_or(last);
    if stem.is_empty() || stem.contains(':') {
        return "api".to_string();
    }
    openapi::sanitize_identifier(stem)
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

async fn fetch(url: &str) -> Result<String, CatalogError> {
    let fetch_err = |message: String| CatalogError::Fetch {
        url: url.to_string(),
        message,
    };
    let response = reqwest::get(url).await.map_err(|e| fetch_err(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fetch_err(format!("HTTP {}", status.as_u16())));
    }
    response.text().await.map_err(|e| fetch_err(e.to_string()))
}

/// Parse document text as JSON, falling back to YAML.
pub fn parse_text(text: &str) -> Result<serde_json::Value, CatalogError> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str::<serde_json::Value>(text).map_err(|yaml_err| {
            CatalogError::Parse(format!("json: {json_err}; yaml: {yaml_err}"))
        }),
    }
}
