//! Per-call credential resolution.
//!
//! Precedence, highest first:
//!
//! 1. the caller's override for this call (from request metadata),
//! 2. the process-level credential configured at startup,
//! 3. none.
//!
//! Resolution is a pure lookup; nothing is cached between calls.

use std::collections::HashMap;

use scriptgate_types::{Credential, CredentialBinding, CredentialMap};

/// Resolves which credential a backend call carries.
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    process: CredentialMap,
}

impl CredentialResolver {
    /// Resolver over credentials configured at startup.
    pub fn new(process: CredentialMap) -> Self {
        Self { process }
    }

    /// Resolve the credential for one call to `api_name`.
    pub fn resolve(&self, api_name: &str, overrides: &CredentialMap) -> Credential {
        overrides
            .get(api_name)
            .filter(|c| !c.is_none())
            .or_else(|| self.process.get(api_name))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a process-level credential exists for `api_name`.
    pub fn has_process_credential(&self, api_name: &str) -> bool {
        self.process.get(api_name).is_some_and(|c| !c.is_none())
    }
}

/// Read process-level credentials for one API from its environment binding.
///
/// A bearer token takes precedence over an API key when both are set.
/// Empty variables count as unset.
pub fn credential_from_env(binding: &CredentialBinding) -> Option<Credential> {
    credential_from_lookup(binding, |name| std::env::var(name).ok())
}

/// Same as [`credential_from_env`] with an injectable variable lookup.
pub fn credential_from_lookup(
    binding: &CredentialBinding,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<Credential> {
    let read = |name: &Option<String>| {
        name.as_deref()
            .and_then(&lookup)
            .filter(|v| !v.is_empty())
    };
    read(&binding.bearer_env)
        .map(Credential::Bearer)
        .or_else(|| read(&binding.api_key_env).map(Credential::ApiKey))
}

/// Parse a request's `auth` metadata: `{api: {type, value}}`.
///
/// Malformed entries are skipped with a warning rather than failing the call;
/// the backend then sees the next credential in precedence order.
pub fn overrides_from_meta(auth: &serde_json::Value) -> CredentialMap {
    let Some(entries) = auth.as_object() else {
        if !auth.is_null() {
            tracing::warn!("ignoring non-object auth metadata");
        }
        return HashMap::new();
    };
    entries
        .iter()
        .filter_map(|(api, raw)| match Credential::from_override(raw) {
            Ok(credential) => Some((api.clone(), credential)),
            Err(reason) => {
                tracing::warn!(api = %api, %reason, "ignoring malformed credential override");
                None
            }
        })
        .collect()
}
