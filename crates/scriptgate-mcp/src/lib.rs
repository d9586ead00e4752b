//! scriptgate-mcp: the MCP front end for scriptgate.
//!
//! Exposes six tools over a stdio or streamable-HTTP MCP transport:
//! `list_apis`, `list_functions`, `get_function_docs`, `search_docs`,
//! `get_schema` and `execute_script`. Everything behind them lives in
//! `scriptgate-kernel`.
//!
//! - [`cli`]: command-line flags
//! - [`server`]: file configuration, settings resolution, kernel startup and
//!   the tool handler
//! - [`auth`]: inbound bearer-token validation for HTTP mode
//! - [`http`]: the axum router for HTTP mode

pub mod auth;
pub mod cli;
pub mod http;
pub mod server;

pub use auth::{AuthContext, AuthError, JwtValidator, McpAuthConfig, extract_bearer_token};
pub use cli::{Cli, Transport};
pub use server::{ScriptgateServer, ServerConfig, Settings, build_kernel};
