//! Startup sequence: load every catalog, connect every tool server, then
//! assemble the kernel.

use std::sync::Arc;

use anyhow::{Context, Result};

use scriptgate_kernel::mcp::connect_all;
use scriptgate_kernel::{ApiCatalog, Kernel, RestApi};

use super::config::{ApiSettings, Settings};

/// Build the kernel described by `settings`.
///
/// A catalog that fails to load is fatal. A tool server that fails to
/// connect is logged and skipped.
pub async fn build_kernel(settings: &Settings) -> Result<Kernel> {
    let catalogs = futures::future::try_join_all(settings.apis.iter().map(load_api)).await?;

    let clients = connect_all(settings.tool_servers.clone()).await;
    if clients.len() < settings.tool_servers.len() {
        tracing::warn!(
            configured = settings.tool_servers.len(),
            connected = clients.len(),
            "some MCP servers are unavailable"
        );
    }

    let mut builder = Kernel::builder(settings.kernel.clone());
    for api in catalogs {
        builder = builder.rest_api(api);
    }
    for client in clients {
        builder = builder.tool_server(Arc::clone(&client));
    }
    builder.build().await
}

async fn load_api(api: &ApiSettings) -> Result<RestApi> {
    let catalog = ApiCatalog::load(&api.name, &api.location, api.options.clone())
        .await
        .with_context(|| format!("failed to load API '{}' from {}", api.name, api.location))?;
    tracing::info!(
        api = %api.name,
        operations = catalog.operations.len(),
        base_url = %catalog.config.base_url,
        "loaded API"
    );

    let mut rest = RestApi::new(catalog).with_binding(api.binding.clone());
    if let Some(credential) = &api.credential {
        rest = rest.with_credential(credential.clone());
    }
    Ok(rest)
}
