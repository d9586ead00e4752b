//! Credentials attached to outgoing backend calls.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// A credential for one backend, resolved fresh per call.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credential {
    #[default]
    None,
    Bearer(String),
    ApiKey(String),
    Basic { username: String, password: String },
}

impl Credential {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Variant name without the secret, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer(_) => "bearer",
            Self::ApiKey(_) => "api_key",
            Self::Basic { .. } => "basic",
        }
    }

    /// Parse one entry of a caller-supplied override map.
    ///
    /// Accepts `{type: "bearer", value}` / `{type: "api_key", value}` and the
    /// `token` / `key` spellings, plus `{type: "basic", username, password}`.
    pub fn from_override(value: &serde_json::Value) -> Result<Self, String> {
        let raw: RawOverride =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        match raw.kind.to_ascii_lowercase().as_str() {
            "bearer" => raw
                .value
                .filter(|v| !v.is_empty())
                .map(Self::Bearer)
                .ok_or_else(|| "bearer credential needs a non-empty value".to_string()),
            "api_key" | "apikey" => raw
                .value
                .filter(|v| !v.is_empty())
                .map(Self::ApiKey)
                .ok_or_else(|| "api_key credential needs a non-empty value".to_string()),
            "basic" => match (raw.username, raw.password) {
                (Some(username), Some(password)) => Ok(Self::Basic { username, password }),
                _ => Err("basic credential needs username and password".to_string()),
            },
            other => Err(format!("unknown credential type '{other}'")),
        }
    }
}

// Secrets never reach logs through Debug.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Credential::None"),
            Self::Bearer(_) => f.write_str("Credential::Bearer(***)"),
            Self::ApiKey(_) => f.write_str("Credential::ApiKey(***)"),
            Self::Basic { username, .. } => {
                write!(f, "Credential::Basic {{ username: {username:?}, password: *** }}")
            }
        }
    }
}

#[derive(Deserialize)]
struct RawOverride {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, alias = "token", alias = "key")]
    value: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Credentials keyed by backend name.
pub type CredentialMap = HashMap<String, Credential>;
