//! The Kernel: registry, dispatch bridge and executor wired together.
//!
//! Startup is a barrier. Every REST catalog is already loaded when it is
//! handed to the builder, and `KernelBuilder::build` waits for every tool
//! server's discovery before the registry is published. After that the
//! registry is immutable for the life of the process.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Kernel                              │
//! │  ┌──────────────────┐   ┌──────────────────────────────────┐ │
//! │  │ FunctionRegistry │◄──│ DispatchBridge                   │ │
//! │  │ (immutable)      │   │  ├── CredentialResolver          │ │
//! │  └──────────────────┘   │  └── RestBackend / ToolBackend   │ │
//! │  ┌──────────────────┐   └──────────────────────────────────┘ │
//! │  │ ScriptExecutor   │── one ExecutionContext per execute()   │
//! │  └──────────────────┘                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use scriptgate_types::{
    ApiKind, ApiSource, Credential, CredentialBinding, CredentialMap, ExecutionReport,
    SourceTransport,
};

use crate::catalog::ApiCatalog;
use crate::credentials::{CredentialResolver, credential_from_env};
use crate::dispatch::{Backend, DispatchBridge, RestBackend, ToolBackend};
use crate::executor::{ExecutionRequest, ExecutorConfig, ScriptExecutor};
use crate::mcp::{McpClient, McpTransport, discover_tools};
use crate::output::OutputConfig;
use crate::registry::FunctionRegistry;

/// Configuration for kernel initialization.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Name of this kernel (for identification).
    pub name: String,

    /// API whose functions are bound bare under `sdk`. When unset, the only
    /// REST API is the default if exactly one is configured.
    pub default_api: Option<String>,

    /// Limits applied to every script run.
    pub executor: ExecutorConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::local()
    }
}

impl KernelConfig {
    /// Local use over stdio: file output enabled in the default directory.
    pub fn local() -> Self {
        Self {
            name: "local".to_string(),
            default_api: None,
            executor: ExecutorConfig::default(),
        }
    }

    /// Hosted HTTP service: no file output unless explicitly configured.
    pub fn hosted() -> Self {
        Self {
            name: "hosted".to_string(),
            default_api: None,
            executor: ExecutorConfig {
                output: None,
                ..ExecutorConfig::default()
            },
        }
    }

    pub fn with_default_api(mut self, api: impl Into<String>) -> Self {
        self.default_api = Some(api.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.executor.timeout = timeout;
        self
    }

    pub fn with_max_api_calls(mut self, max: u64) -> Self {
        self.executor.max_api_calls = max;
        self
    }

    /// Set the Lua heap cap in bytes. `None` removes the cap.
    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.executor.memory_limit = bytes;
        self
    }

    /// Enable file output under `config`, or disable it with `None`.
    pub fn with_output(mut self, config: Option<OutputConfig>) -> Self {
        self.executor.output = config;
        self
    }
}

/// A REST API as handed to the builder.
#[derive(Debug, Clone)]
pub struct RestApi {
    pub catalog: ApiCatalog,
    /// Environment variables the process credential is read from.
    pub binding: CredentialBinding,
    /// Credential configured directly. Wins over `binding`.
    pub credential: Option<Credential>,
}

impl RestApi {
    /// An API whose credential comes from the conventional variables.
    pub fn new(catalog: ApiCatalog) -> Self {
        let binding = CredentialBinding::conventional(&catalog.config.name);
        Self {
            catalog,
            binding,
            credential: None,
        }
    }

    pub fn with_binding(mut self, binding: CredentialBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    fn name(&self) -> &str {
        &self.catalog.config.name
    }
}

/// Collects backends, then runs discovery and publishes the registry.
#[derive(Debug, Default)]
pub struct KernelBuilder {
    config: KernelConfig,
    http: Option<reqwest::Client>,
    rest: Vec<RestApi>,
    tools: Vec<Arc<McpClient>>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// HTTP client shared by every REST backend.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn rest_api(mut self, api: RestApi) -> Self {
        self.rest.push(api);
        self
    }

    /// A connected tool server. Its tools are discovered in `build`.
    pub fn tool_server(mut self, client: Arc<McpClient>) -> Self {
        self.tools.push(client);
        self
    }

    /// Discover every tool server, then build the registry and executor.
    ///
    /// A tool server whose discovery fails is logged and left out; the
    /// gateway still serves everything else.
    pub async fn build(self) -> Result<Kernel> {
        let Self {
            config,
            http,
            rest,
            tools,
        } = self;

        let http = match http {
            Some(client) => client,
            None => reqwest::Client::builder()
                .user_agent(concat!("scriptgate/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("failed to build HTTP client")?,
        };

        let discoveries = futures::future::join_all(tools.iter().map(|client| async move {
            let discovered = discover_tools(client).await;
            let instructions = client.instructions().await;
            (client, discovered, instructions)
        }))
        .await;

        let mut registry = FunctionRegistry::builder().default_api(config.default_api.clone());
        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
        let mut process = CredentialMap::new();
        let mut sources = Vec::new();

        for api in rest {
            let name = api.name().to_string();
            match api.credential.clone().or_else(|| credential_from_env(&api.binding)) {
                Some(credential) => {
                    tracing::debug!(api = %name, kind = credential.kind(), "process credential configured");
                    process.insert(name.clone(), credential);
                }
                None if api.catalog.config.auth_scheme.is_some() => {
                    tracing::warn!(
                        api = %name,
                        "API declares a security scheme but no credential is configured; calls need a per-call override"
                    );
                }
                None => {}
            }

            sources.push(ApiSource {
                name,
                kind: ApiKind::Rest,
                transport: SourceTransport::Rest {
                    base_url: api.catalog.config.base_url.clone(),
                },
                credential_binding: api.binding,
                description: api.catalog.config.description.clone(),
            });
            backends.push(Arc::new(RestBackend::new(api.catalog.config.clone(), http.clone())));
            registry = registry.rest_api(api.catalog);
        }

        let mut clients = Vec::new();
        for (client, discovered, instructions) in discoveries {
            let descriptors = match discovered {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    tracing::warn!(server = client.name(), error = %e, "tool discovery failed, skipping server");
                    continue;
                }
            };
            tracing::info!(server = client.name(), tools = descriptors.len(), "discovered tools");
            sources.push(ApiSource {
                name: client.name().to_string(),
                kind: ApiKind::ToolProtocol,
                transport: source_transport(client.transport()),
                credential_binding: CredentialBinding::default(),
                description: instructions.clone(),
            });
            registry = registry.tool_server(client.name().to_string(), instructions, descriptors);
            backends.push(Arc::new(ToolBackend::new(Arc::clone(client))));
            clients.push(Arc::clone(client));
        }

        let registry = Arc::new(registry.build().context("failed to build function registry")?);
        let bridge = Arc::new(DispatchBridge::new(
            Arc::clone(&registry),
            backends,
            CredentialResolver::new(process),
        ));
        let executor = ScriptExecutor::new(Arc::clone(&bridge), config.executor.clone());

        tracing::info!(
            kernel = %config.name,
            apis = sources.len(),
            functions = registry.len(),
            default_api = registry.default_api().unwrap_or("-"),
            "kernel ready"
        );

        Ok(Kernel {
            config,
            registry,
            bridge,
            executor,
            sources,
            clients,
        })
    }
}

fn source_transport(transport: &McpTransport) -> SourceTransport {
    match transport {
        McpTransport::Stdio { command, args, env } => SourceTransport::Stdio {
            command: command.clone(),
            args: args.clone(),
            env: env.iter().cloned().collect(),
        },
        McpTransport::Http { url } => SourceTransport::Http { url: url.clone() },
        McpTransport::Preconnected => SourceTransport::InProcess,
    }
}

/// The gateway core. Cheap to share behind an `Arc`; every `execute` call
/// runs in its own context.
#[derive(Debug)]
pub struct Kernel {
    config: KernelConfig,
    registry: Arc<FunctionRegistry>,
    bridge: Arc<DispatchBridge>,
    executor: ScriptExecutor,
    sources: Vec<ApiSource>,
    clients: Vec<Arc<McpClient>>,
}

impl Kernel {
    pub fn builder(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<DispatchBridge> {
        &self.bridge
    }

    /// Configured backends that made it into the registry, REST first.
    pub fn sources(&self) -> &[ApiSource] {
        &self.sources
    }

    /// Run one script. See [`ScriptExecutor::execute`].
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionReport {
        self.executor.execute(request).await
    }

    /// Disconnect every tool server.
    pub async fn shutdown(&self) {
        for client in &self.clients {
            if let Err(e) = client.disconnect().await {
                tracing::warn!(server = client.name(), error = %e, "failed to disconnect MCP server");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogOptions;
    use serde_json::json;

    fn petstore() -> ApiCatalog {
        let doc = json!({
            "openapi": "3.0.0",
            "info": {"title": "Petstore", "version": "1"},
            "servers": [{"url": "http://127.0.0.1:9"}],
            "paths": {
                "/pets": {"get": {"operationId": "list_pets", "summary": "List pets"}}
            },
            "components": {
                "securitySchemes": {"bearer": {"type": "http", "scheme": "bearer"}}
            }
        });
        ApiCatalog::from_document("petstore", &doc, &CatalogOptions::default()).expect("catalog")
    }

    #[test]
    fn test_presets() {
        assert!(KernelConfig::local().executor.output.is_some());
        assert!(KernelConfig::hosted().executor.output.is_none());

        let config = KernelConfig::local()
            .with_timeout(Duration::from_millis(500))
            .with_max_api_calls(3)
            .with_default_api("petstore");
        assert_eq!(config.executor.timeout, Duration::from_millis(500));
        assert_eq!(config.executor.max_api_calls, 3);
        assert_eq!(config.default_api.as_deref(), Some("petstore"));
    }

    #[tokio::test]
    async fn test_build_single_rest_api_is_default() {
        let kernel = Kernel::builder(KernelConfig::local())
            .rest_api(RestApi::new(petstore()).with_credential(Credential::Bearer("t".to_string())))
            .build()
            .await
            .expect("build");

        assert_eq!(kernel.registry().default_api(), Some("petstore"));
        assert!(kernel.registry().get("list_pets").is_some());
        assert!(kernel.bridge().credentials().has_process_credential("petstore"));
        assert_eq!(kernel.sources().len(), 1);
        assert_eq!(kernel.sources()[0].kind, ApiKind::Rest);
        assert_eq!(
            kernel.sources()[0].credential_binding.bearer_env.as_deref(),
            Some("PETSTORE_BEARER_TOKEN")
        );
    }

    #[tokio::test]
    async fn test_build_rejects_unknown_default() {
        let err = Kernel::builder(KernelConfig::local().with_default_api("nope"))
            .rest_api(RestApi::new(petstore()))
            .build()
            .await
            .expect_err("unknown default api");
        assert!(format!("{err:#}").contains("nope"));
    }
}
