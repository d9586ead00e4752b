//! Streamable-HTTP transport.
//!
//! ```text
//! /mcp                                     StreamableHttpService (JWT-guarded when auth is on)
//! /.well-known/oauth-protected-resource    metadata document (auth only, else 404)
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::{JwtValidator, PROTECTED_RESOURCE_PATH, auth_middleware};
use crate::server::{ScriptgateServer, Settings};

/// Build the axum app. Sessions created under `/mcp` end when `ct` is
/// cancelled.
pub fn router(server: ScriptgateServer, validator: Option<Arc<JwtValidator>>, ct: &CancellationToken) -> Router {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            stateful_mode: true,
            cancellation_token: ct.child_token(),
            ..Default::default()
        },
    );

    let app = Router::new().nest_service("/mcp", service);
    let Some(validator) = validator else {
        return app;
    };

    let metadata = validator.config().protected_resource_metadata();
    app.route_layer(axum::middleware::from_fn_with_state(validator, auth_middleware))
        .route(
            PROTECTED_RESOURCE_PATH,
            get(move || async move { axum::Json(metadata) }),
        )
}

/// Bind `settings.host:settings.port` and serve until ctrl-c.
pub async fn serve_http(server: ScriptgateServer, settings: &Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let validator = settings.auth.clone().map(|config| Arc::new(JwtValidator::new(config)));
    match &settings.auth {
        Some(auth) => tracing::info!(
            addr = %addr,
            authority = %auth.authority,
            audience = %auth.audience,
            "serving MCP over HTTP at /mcp with bearer auth"
        ),
        None => tracing::info!(addr = %addr, "serving MCP over HTTP at /mcp without auth"),
    }

    let ct = CancellationToken::new();
    let app = router(server, validator, &ct);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
            ct.cancel();
        })
        .await
        .context("HTTP server failed")
}
