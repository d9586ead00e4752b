//! scriptgate-mcp: MCP server binary for scriptgate.
//!
//! # Usage
//!
//! ```bash
//! # One OpenAPI document over stdio
//! scriptgate-mcp --spec petstore=./petstore.yaml --auth PETSTORE_TOKEN
//!
//! # REST plus an MCP tool server, over HTTP with inbound JWT auth
//! scriptgate-mcp --spec ./petstore.yaml --mcp git="uvx mcp-server-git" \
//!     --transport http --port 8080 \
//!     --auth-authority https://auth.example.com --auth-audience https://mcp.example.com
//!
//! # Everything from a config file
//! scriptgate-mcp --config ./scriptgate.toml
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use rmcp::service::ServiceExt;
use rmcp::transport::io::stdio;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use scriptgate_mcp::http::serve_http;
use scriptgate_mcp::{Cli, ScriptgateServer, Settings, Transport, build_kernel};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // If OTEL_EXPORTER_OTLP_ENDPOINT is set, export spans via OTLP.
    let provider = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()
            .context("Failed to build OTLP exporter")?;
        let resource = Resource::builder()
            .with_attributes([
                KeyValue::new("service.name", "scriptgate-mcp"),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();
        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();
        opentelemetry::global::set_tracer_provider(provider.clone());
        Some(provider)
    } else {
        None
    };

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("scriptgate-mcp")));

    // stdout carries the MCP stream in stdio mode.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .with(EnvFilter::from_default_env().add_directive("scriptgate_mcp=info".parse()?))
        .init();

    let settings = Settings::load(&cli).context("Failed to load configuration")?;
    tracing::info!(
        name = %settings.kernel.name,
        apis = settings.apis.len(),
        tool_servers = settings.tool_servers.len(),
        transport = ?settings.transport,
        output = settings.kernel.executor.output.is_some(),
        "starting scriptgate MCP server"
    );

    let kernel = Arc::new(build_kernel(&settings).await.context("Failed to start kernel")?);
    let server = ScriptgateServer::from_shared(Arc::clone(&kernel));

    match settings.transport {
        Transport::Stdio => {
            tracing::info!("Serving on stdio");
            let service = server
                .serve(stdio())
                .await
                .context("Failed to start MCP service")?;
            service.waiting().await?;
        }
        Transport::Http => serve_http(server, &settings).await?,
    }

    kernel.shutdown().await;
    tracing::info!("Server shutdown complete");

    if let Some(provider) = provider {
        // Explicitly ignored: shutdown errors are non-fatal at process exit
        let _ = provider.shutdown();
    }

    Ok(())
}
