//! The scriptgate MCP server.
//!
//! # Features
//!
//! - **Discovery tools**: `list_apis`, `list_functions`, `search_docs`,
//!   `get_function_docs`, `get_schema`
//! - **execute_script**: run a Luau script against the SDK in a fresh,
//!   isolated context
//! - **Resources**: per-API overview, function docs and schemas under
//!   `sdk://{api}/...`
//! - **Layered configuration**: TOML file, environment, CLI flags
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use rmcp::ServiceExt;
//! use rmcp::transport::io::stdio;
//! use scriptgate_mcp::{Cli, ScriptgateServer, Settings, build_kernel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(&Cli::parse())?;
//!     let kernel = build_kernel(&settings).await?;
//!     let service = ScriptgateServer::new(kernel).serve(stdio()).await?;
//!     service.waiting().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod handler;
pub mod resources;
pub mod startup;

pub use config::{ApiSettings, ServerConfig, Settings};
pub use handler::ScriptgateServer;
pub use startup::build_kernel;
