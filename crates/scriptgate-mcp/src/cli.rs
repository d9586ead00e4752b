//! Command-line flags.
//!
//! Flags win over environment variables, which win over the TOML file. The
//! merge itself happens in [`crate::server::Settings::resolve`].

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};

/// Outward MCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Transport {
    /// JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// Streamable HTTP on `--host`:`--port`, under `/mcp`.
    #[value(alias = "sse")]
    Http,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "scriptgate-mcp",
    version,
    about = "Serve OpenAPI and MCP backends to agents as a scriptable Luau SDK"
)]
pub struct Cli {
    /// TOML config file (default: the platform config dir's scriptgate/config.toml)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// OpenAPI document to serve, optionally named: `petstore=./petstore.yaml`
    #[arg(long = "spec", value_name = "[NAME=]PATH_OR_URL")]
    pub specs: Vec<String>,

    /// Tool server to connect to: `git=uvx mcp-server-git` or `docs=https://host/mcp`
    #[arg(long = "mcp", value_name = "NAME=COMMAND_OR_URL")]
    pub mcp_servers: Vec<String>,

    /// Bearer token for an API read from an environment variable: `[NAME:]ENV_VAR`
    #[arg(long = "auth", value_name = "[NAME:]ENV_VAR")]
    pub auth: Vec<String>,

    /// API whose functions are callable as bare `sdk.<fn>`
    #[arg(long, value_name = "NAME")]
    pub default_api: Option<String>,

    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// OAuth authority whose tokens are accepted (enables inbound auth)
    #[arg(long, env = "MCP_AUTH_AUTHORITY")]
    pub auth_authority: Option<String>,

    /// Expected token audience (required with --auth-authority)
    #[arg(long, env = "MCP_AUTH_AUDIENCE")]
    pub auth_audience: Option<String>,

    /// Key set URL; discovered from the authority when omitted
    #[arg(long, env = "MCP_AUTH_JWKS_URI")]
    pub auth_jwks_uri: Option<String>,

    /// Script timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Backend calls allowed per script
    #[arg(long)]
    pub max_api_calls: Option<u64>,

    /// Luau heap limit in megabytes
    #[arg(long, value_name = "MB")]
    pub memory_limit: Option<usize>,

    /// Directory `file.save` writes into
    #[arg(long, value_name = "DIR", conflicts_with = "no_output")]
    pub output_dir: Option<PathBuf>,

    /// Leave `file` out of the script environment
    #[arg(long)]
    pub no_output: bool,
}

/// A `--spec` value: optional name and document location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecArg {
    pub name: Option<String>,
    pub location: String,
}

/// Parse `[name=]path_or_url`. An `=` inside a URL does not start a name.
pub fn parse_spec_arg(arg: &str) -> SpecArg {
    match arg.split_once('=') {
        Some((name, location)) if !name.is_empty() && !name.contains("://") && !name.contains('/') => {
            SpecArg {
                name: Some(name.to_string()),
                location: location.to_string(),
            }
        }
        _ => SpecArg {
            name: None,
            location: arg.to_string(),
        },
    }
}

/// A `--mcp` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpArg {
    Command { command: String, args: Vec<String> },
    Url(String),
}

/// Parse `name=command args...` or `name=http(s)://...`.
pub fn parse_mcp_arg(arg: &str) -> Result<(String, McpArg)> {
    let Some((name, value)) = arg.split_once('=') else {
        bail!("invalid --mcp value '{arg}': expected NAME=COMMAND_OR_URL");
    };
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        bail!("invalid --mcp value '{arg}': name and value must be non-empty");
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok((name.to_string(), McpArg::Url(value.to_string())));
    }
    let mut parts = value.split_whitespace().map(String::from);
    let command = parts.next().unwrap_or_default();
    Ok((
        name.to_string(),
        McpArg::Command {
            command,
            args: parts.collect(),
        },
    ))
}

/// Parse `[name:]ENV_VAR`.
pub fn parse_auth_arg(arg: &str) -> Result<(Option<String>, String)> {
    if arg.is_empty() {
        bail!("--auth value cannot be empty");
    }
    match arg.split_once(':') {
        None => Ok((None, arg.to_string())),
        Some((name, var)) if !name.is_empty() && !var.is_empty() => {
            Ok((Some(name.to_string()), var.to_string()))
        }
        Some(_) => bail!("invalid --auth value '{arg}': expected NAME:ENV_VAR or ENV_VAR"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("./petstore.yaml", None, "./petstore.yaml")]
    #[case("pets=./petstore.yaml", Some("pets"), "./petstore.yaml")]
    #[case("pets=https://example.com/openapi.json", Some("pets"), "https://example.com/openapi.json")]
    #[case("https://example.com/spec?v=2", None, "https://example.com/spec?v=2")]
    fn test_parse_spec_arg(#[case] arg: &str, #[case] name: Option<&str>, #[case] location: &str) {
        let parsed = parse_spec_arg(arg);
        assert_eq!(parsed.name.as_deref(), name);
        assert_eq!(parsed.location, location);
    }

    #[test]
    fn test_parse_mcp_arg() {
        assert_eq!(
            parse_mcp_arg("git=uvx mcp-server-git --repo .").expect("command"),
            (
                "git".to_string(),
                McpArg::Command {
                    command: "uvx".to_string(),
                    args: vec!["mcp-server-git".to_string(), "--repo".to_string(), ".".to_string()],
                }
            )
        );
        assert_eq!(
            parse_mcp_arg("docs=https://example.com/mcp").expect("url"),
            ("docs".to_string(), McpArg::Url("https://example.com/mcp".to_string()))
        );
        assert!(parse_mcp_arg("no-equals").is_err());
        assert!(parse_mcp_arg("=cmd").is_err());
        assert!(parse_mcp_arg("name=  ").is_err());
    }

    #[test]
    fn test_parse_auth_arg() {
        assert_eq!(
            parse_auth_arg("pets:PETS_TOKEN").expect("named"),
            (Some("pets".to_string()), "PETS_TOKEN".to_string())
        );
        assert_eq!(parse_auth_arg("TOKEN").expect("bare"), (None, "TOKEN".to_string()));
        assert!(parse_auth_arg("").is_err());
        assert!(parse_auth_arg(":TOKEN").is_err());
        assert!(parse_auth_arg("pets:").is_err());
    }

    #[test]
    fn test_transport_alias() {
        let cli = Cli::try_parse_from(["scriptgate-mcp", "--transport", "sse", "--spec", "a.yaml"])
            .expect("parse");
        assert_eq!(cli.transport, Transport::Http);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.host, "127.0.0.1");
    }

    #[test]
    fn test_output_flags_conflict() {
        let parsed = Cli::try_parse_from(["scriptgate-mcp", "--no-output", "--output-dir", "out"]);
        assert!(parsed.is_err());
    }
}
