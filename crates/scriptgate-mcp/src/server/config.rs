//! Configuration for the scriptgate MCP server.
//!
//! An optional TOML file (`--config`, else `config.toml` in the platform
//! config directory) is layered under environment variables and CLI flags.
//!
//! ```toml
//! default_api = "petstore"
//! frozen_params = { tenant = "acme" }
//!
//! [apis.petstore]
//! spec = "./petstore.yaml"
//! auth_env = "PETSTORE_TOKEN"
//!
//! [mcp_servers.git]
//! command = "uvx"
//! args = ["mcp-server-git"]
//!
//! [output]
//! dir = "./scriptgate-output"
//!
//! [limits]
//! timeout_ms = 30000
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use scriptgate_kernel::mcp::{McpConfig, McpTransport};
use scriptgate_kernel::output::{DEFAULT_MAX_BYTES, DEFAULT_OUTPUT_DIR};
use scriptgate_kernel::{CatalogOptions, ExecutorConfig, KernelConfig, OutputConfig, api_name_from_location};
use scriptgate_types::{Credential, CredentialBinding};

use crate::auth::McpAuthConfig;
use crate::cli::{Cli, McpArg, Transport, parse_auth_arg, parse_mcp_arg, parse_spec_arg};

/// The TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server name (shown in logs).
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub default_api: Option<String>,

    /// Frozen parameters applied to every API; per-API entries win.
    #[serde(default)]
    pub frozen_params: HashMap<String, String>,

    #[serde(default)]
    pub apis: BTreeMap<String, ApiEntry>,

    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ToolServerEntry>,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub limits: LimitsSection,
}

/// `[apis.<name>]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiEntry {
    /// Path or URL of the OpenAPI document.
    pub spec: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: Option<ApiAuth>,
    /// Bearer token variable.
    #[serde(default)]
    pub auth_env: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub frozen_params: HashMap<String, String>,
}

/// `auth = ...` for one API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiAuth {
    /// A bearer token written into the file.
    Bearer(String),
    /// `{ auth_env = "VAR" }`
    Env { auth_env: String },
    /// `{ type = "basic", username, password }`
    Basic {
        #[serde(default, rename = "type")]
        kind: Option<String>,
        username: String,
        password: String,
    },
}

/// `[mcp_servers.<name>]`: exactly one of `command` and `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolServerEntry {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ToolServerEntry {
    fn transport(&self, name: &str) -> Result<McpTransport> {
        match (&self.command, &self.url) {
            (Some(command), None) => Ok(McpTransport::Stdio {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            }),
            (None, Some(url)) => {
                if !self.args.is_empty() || !self.env.is_empty() {
                    bail!("mcp server '{name}': 'args' and 'env' only apply to 'command'");
                }
                Ok(McpTransport::Http { url: url.clone() })
            }
            (Some(_), Some(_)) => bail!("mcp server '{name}': set either 'command' or 'url', not both"),
            (None, None) => bail!("mcp server '{name}': one of 'command' or 'url' is required"),
        }
    }
}

impl From<McpArg> for ToolServerEntry {
    fn from(arg: McpArg) -> Self {
        match arg {
            McpArg::Command { command, args } => Self {
                command: Some(command),
                args,
                ..Default::default()
            },
            McpArg::Url(url) => Self {
                url: Some(url),
                ..Default::default()
            },
        }
    }
}

/// `[output]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Unset means on locally and off in authenticated HTTP mode.
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: None,
            max_bytes: default_max_bytes(),
            enabled: None,
        }
    }
}

/// `[limits]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_api_calls")]
    pub max_api_calls: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_api_calls() -> u64 {
    100
}

fn default_memory_limit_mb() -> usize {
    64
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_api_calls: default_max_api_calls(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

impl ServerConfig {
    /// Load the file named by `--config`, or the default path.
    ///
    /// A missing default file means defaults; a missing explicit file is an
    /// error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        let Some(path) = Self::config_path() else {
            tracing::debug!("no config directory on this platform, using defaults");
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// `config.toml` under the platform config dir for `scriptgate`.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scriptgate").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// One REST API, ready for catalog loading.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub name: String,
    pub location: String,
    pub options: CatalogOptions,
    pub binding: CredentialBinding,
    /// Credential written into the config file.
    pub credential: Option<Credential>,
}

/// Everything the binary needs after merging flags, environment and file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub kernel: KernelConfig,
    pub apis: Vec<ApiSettings>,
    pub tool_servers: Vec<McpConfig>,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub auth: Option<McpAuthConfig>,
}

impl Settings {
    /// Read the config file named by the flags and merge.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = ServerConfig::load(cli.config.as_deref())?;
        Self::resolve(cli, file)
    }

    /// Merge flags over the file. Flags win.
    pub fn resolve(cli: &Cli, file: ServerConfig) -> Result<Self> {
        let auth = McpAuthConfig::from_parts(
            cli.auth_authority.clone(),
            cli.auth_audience.clone(),
            cli.auth_jwks_uri.clone(),
        )?;
        let hosted = cli.transport == Transport::Http && auth.is_some();

        let mut apis = resolve_apis(cli, &file)?;
        apply_cli_auth(&cli.auth, &mut apis)?;
        let tool_servers = resolve_tool_servers(&cli.mcp_servers, &file)?;
        if apis.is_empty() && tool_servers.is_empty() {
            bail!("nothing to serve: pass --spec or --mcp, or configure [apis] / [mcp_servers]");
        }

        let limits = &file.limits;
        let timeout = match cli.timeout {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_millis(limits.timeout_ms),
        };
        let memory_mb = cli.memory_limit.unwrap_or(limits.memory_limit_mb);
        let executor = ExecutorConfig {
            timeout,
            max_api_calls: cli.max_api_calls.unwrap_or(limits.max_api_calls),
            memory_limit: (memory_mb > 0).then(|| memory_mb * 1024 * 1024),
            output: resolve_output(cli, &file.output, hosted),
        };

        Ok(Self {
            kernel: KernelConfig {
                name: file.name.clone().unwrap_or_else(|| "scriptgate".to_string()),
                default_api: cli.default_api.clone().or_else(|| file.default_api.clone()),
                executor,
            },
            apis,
            tool_servers,
            transport: cli.transport,
            host: cli.host.clone(),
            port: cli.port,
            auth,
        })
    }
}

/// File entries in name order, then `--spec` flags. A flag naming a file
/// entry replaces its document location.
fn resolve_apis(cli: &Cli, file: &ServerConfig) -> Result<Vec<ApiSettings>> {
    let mut apis: Vec<ApiSettings> = file
        .apis
        .iter()
        .map(|(name, entry)| api_from_entry(name, entry, &file.frozen_params))
        .collect();

    for arg in cli.specs.iter().map(|s| parse_spec_arg(s)) {
        let name = arg
            .name
            .clone()
            .unwrap_or_else(|| api_name_from_location(&arg.location));
        if let Some(existing) = apis.iter_mut().find(|a| a.name == name) {
            existing.location = arg.location;
            continue;
        }
        apis.push(ApiSettings {
            binding: CredentialBinding::conventional(&name),
            options: CatalogOptions {
                frozen_params: file.frozen_params.clone(),
                ..Default::default()
            },
            name,
            location: arg.location,
            credential: None,
        });
    }
    Ok(apis)
}

fn api_from_entry(name: &str, entry: &ApiEntry, global_frozen: &HashMap<String, String>) -> ApiSettings {
    let mut frozen = global_frozen.clone();
    frozen.extend(entry.frozen_params.clone());

    let mut binding = if entry.auth_env.is_some() || entry.api_key_env.is_some() {
        CredentialBinding {
            bearer_env: entry.auth_env.clone(),
            api_key_env: entry.api_key_env.clone(),
        }
    } else {
        CredentialBinding::conventional(name)
    };
    let credential = match &entry.auth {
        Some(ApiAuth::Bearer(token)) => Some(Credential::Bearer(token.clone())),
        Some(ApiAuth::Basic { username, password, .. }) => Some(Credential::Basic {
            username: username.clone(),
            password: password.clone(),
        }),
        Some(ApiAuth::Env { auth_env }) => {
            binding.bearer_env = Some(auth_env.clone());
            None
        }
        None => None,
    };

    ApiSettings {
        name: name.to_string(),
        location: entry.spec.clone(),
        options: CatalogOptions {
            base_url: entry.base_url.clone(),
            document_url: None,
            frozen_params: frozen,
        },
        binding,
        credential,
    }
}

/// `--auth [name:]VAR` binds a bearer variable and drops any token from the
/// file. An unnamed flag needs exactly one API.
fn apply_cli_auth(flags: &[String], apis: &mut [ApiSettings]) -> Result<()> {
    for flag in flags {
        let (name, var) = parse_auth_arg(flag)?;
        let api = match name {
            Some(name) => match apis.iter_mut().find(|a| a.name == name) {
                Some(api) => api,
                None => bail!("--auth {flag}: no API named '{name}'"),
            },
            None => match &mut *apis {
                [only] => only,
                _ => bail!("--auth {flag}: name the API (NAME:ENV_VAR) when more than one is configured"),
            },
        };
        api.binding.bearer_env = Some(var);
        api.credential = None;
    }
    Ok(())
}

/// File entries, then `--mcp` flags replacing entries of the same name.
fn resolve_tool_servers(flags: &[String], file: &ServerConfig) -> Result<Vec<McpConfig>> {
    let mut entries: Vec<(String, ToolServerEntry)> = file
        .mcp_servers
        .iter()
        .map(|(name, entry)| (name.clone(), entry.clone()))
        .collect();
    for flag in flags {
        let (name, arg) = parse_mcp_arg(flag)?;
        match entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, entry)) => *entry = arg.into(),
            None => entries.push((name, arg.into())),
        }
    }
    entries
        .into_iter()
        .map(|(name, entry)| {
            let transport = entry.transport(&name)?;
            Ok(McpConfig { name, transport })
        })
        .collect()
}

fn resolve_output(cli: &Cli, section: &OutputSection, hosted: bool) -> Option<OutputConfig> {
    if cli.no_output {
        return None;
    }
    let root = match &cli.output_dir {
        Some(dir) => dir.clone(),
        None => {
            let enabled = section.enabled.unwrap_or(!hosted);
            if !enabled {
                return None;
            }
            section
                .dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
        }
    };
    Some(OutputConfig {
        root,
        max_bytes: section.max_bytes,
    })
}
