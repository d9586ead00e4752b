//! scriptgate-kernel: the core of scriptgate.
//!
//! This crate provides:
//!
//! - **Catalog**: OpenAPI documents to `Operation` records
//! - **MCP**: Clients for external tool servers and tool discovery
//! - **Registry**: One namespace over both sources, with docs and search
//! - **Credentials**: Per-call credential resolution with override precedence
//! - **Dispatch**: The bridge from a function call to a REST or tool round-trip
//! - **Sandbox**: The capability-limited Luau environment
//! - **Executor**: Deadlines, call quotas, log capture and the watchdog
//! - **Output**: Script file writes confined to one directory
//! - **Kernel**: Startup barrier and the assembled gateway

pub mod catalog;
pub mod credentials;
pub mod dispatch;
pub mod executor;
pub mod kernel;
pub mod mcp;
pub mod output;
pub mod registry;
pub mod sandbox;

pub use catalog::{ApiCatalog, CatalogError, CatalogOptions, api_name_from_location};
pub use credentials::{CredentialResolver, credential_from_env, overrides_from_meta};
pub use dispatch::{Backend, BoundCall, CallArgs, DispatchBridge, RestBackend, ToolBackend};
pub use executor::{
    ExecutionContext, ExecutionError, ExecutionRequest, ExecutorConfig, ScriptExecutor, WATCHDOG_GRACE,
};
pub use kernel::{Kernel, KernelBuilder, KernelConfig, RestApi};
pub use output::{OutputConfig, OutputError, OutputGuard};
pub use registry::{
    ApiSummary, FunctionRegistry, FunctionSummary, LookupError, MatchType, RegistryBuilder,
    RegistryError, SearchHit,
};
