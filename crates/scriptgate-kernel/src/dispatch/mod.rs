//! Dispatch bridge: function calls to backend round-trips.
//!
//! Every registry entry dispatches through one contract,
//! `DispatchBridge::invoke(qualified_name, args)`, in two steps:
//!
//! 1. `prepare` looks the entry up and binds the arguments against its
//!    parameters. Nothing leaves the process, so a call rejected here costs
//!    no call budget.
//! 2. `send` resolves a credential for the entry's API and hands the bound
//!    call to that API's `Backend`.
//!
//! The only place the source kind matters is which backend the entry's API
//! maps to.
//!
//! ```text
//! script call ──► CallArgs::from_values ──► DispatchBridge::prepare ──► BoundCall
//!                                                                          │
//!                                           DispatchBridge::send ◄─────────┘
//!                                               ├── CredentialResolver
//!                                               └── Backend (per API)
//!                                                     ├── RestBackend ──► reqwest
//!                                                     └── ToolBackend ──► McpClient
//! ```

mod format;
mod rest;
mod tool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use scriptgate_types::{
    Credential, CredentialMap, DispatchError, FunctionEntry, FunctionTarget, ParamLocation, ParamSpec,
};

use crate::credentials::CredentialResolver;
use crate::registry::FunctionRegistry;

pub use rest::RestBackend;
pub use tool::ToolBackend;

/// Arguments a script passed to one call, already converted to JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Scalars passed positionally, mapped onto params in declaration order.
    pub positional: Vec<JsonValue>,
    /// Named parameters from a table argument.
    pub named: Map<String, JsonValue>,
    /// Whole request body, for REST functions that take one.
    pub body: Option<JsonValue>,
}

impl CallArgs {
    pub fn named(named: Map<String, JsonValue>) -> Self {
        Self {
            named,
            ..Default::default()
        }
    }

    /// Interpret a script's argument list for a given function.
    ///
    /// - `f({a = 1})` passes named params.
    /// - `f({a = 1}, {..})` passes named params and a body.
    /// - `f({..})` for a function whose only input is a request body passes
    ///   the body.
    /// - `f(1, "x")` passes positional params.
    pub fn from_values(entry: &FunctionEntry, mut values: Vec<JsonValue>) -> Self {
        while values.last().is_some_and(JsonValue::is_null) {
            values.pop();
        }
        let body_only = match &entry.target {
            FunctionTarget::Rest(op) => op.request_body.is_some() && !op.has_visible_params(),
            FunctionTarget::Tool(_) => false,
        };

        let mut iter = values.into_iter();
        match iter.next() {
            None => Self::default(),
            Some(first) if body_only => Self {
                body: Some(first),
                ..Default::default()
            },
            Some(JsonValue::Object(named)) => Self {
                named,
                body: iter.next(),
                ..Default::default()
            },
            // An empty table converts to an empty array.
            Some(JsonValue::Array(items)) if items.is_empty() => Self {
                body: iter.next(),
                ..Default::default()
            },
            Some(first) => {
                let mut positional = vec![first];
                positional.extend(iter);
                Self {
                    positional,
                    ..Default::default()
                }
            }
        }
    }
}

/// A call whose arguments passed binding and validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCall {
    pub qualified_name: String,
    /// Arguments keyed by parameter name.
    pub params: Map<String, JsonValue>,
    /// Whole request body, REST only.
    pub body: Option<JsonValue>,
}

/// One backend's dispatch path.
#[async_trait]
pub trait Backend: Send + Sync {
    /// API name this backend serves.
    fn name(&self) -> &str;

    /// Perform the round-trip for `entry`.
    async fn invoke(
        &self,
        entry: &FunctionEntry,
        call: BoundCall,
        credential: &Credential,
    ) -> Result<JsonValue, DispatchError>;
}

/// Routes registry entries to their backends.
pub struct DispatchBridge {
    registry: Arc<FunctionRegistry>,
    backends: HashMap<String, Arc<dyn Backend>>,
    credentials: CredentialResolver,
}

impl DispatchBridge {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        backends: Vec<Arc<dyn Backend>>,
        credentials: CredentialResolver,
    ) -> Self {
        let backends = backends
            .into_iter()
            .map(|b| (b.name().to_string(), b))
            .collect();
        Self {
            registry,
            backends,
            credentials,
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    /// Call a function by qualified name.
    pub async fn invoke(
        &self,
        qualified_name: &str,
        args: CallArgs,
        overrides: &CredentialMap,
    ) -> Result<JsonValue, DispatchError> {
        let call = self.prepare(qualified_name, args)?;
        self.send(call, overrides).await
    }

    /// Bind and validate `args` for a function without dispatching it.
    pub fn prepare(&self, qualified_name: &str, mut args: CallArgs) -> Result<BoundCall, DispatchError> {
        let entry = self.entry(qualified_name)?;
        let mut params = bind_params(entry, &mut args)?;
        let mut body = args.body.take();

        match &entry.target {
            FunctionTarget::Rest(op) => {
                let has_body_fields = op
                    .parameters
                    .iter()
                    .any(|p| p.location == ParamLocation::Body && params.contains_key(&p.name));
                if body.is_none() && !has_body_fields && op.request_body.as_ref().is_some_and(|b| b.required) {
                    return Err(DispatchError::InvalidArguments(format!(
                        "function '{}' requires a request body",
                        entry.qualified_name
                    )));
                }
            }
            // A trailing table after named args is merged in, so
            // `sdk.srv.tool({a = 1}, {b = 2})` reads the same as one table.
            FunctionTarget::Tool(_) => {
                if let Some(JsonValue::Object(extra)) = body.take() {
                    params.extend(extra);
                }
            }
        }

        Ok(BoundCall {
            qualified_name: entry.qualified_name.clone(),
            params,
            body,
        })
    }

    /// Dispatch a prepared call to its backend.
    #[tracing::instrument(level = "debug", skip_all, fields(function = %call.qualified_name))]
    pub async fn send(&self, call: BoundCall, overrides: &CredentialMap) -> Result<JsonValue, DispatchError> {
        let entry = self.entry(&call.qualified_name)?;
        let backend = self
            .backends
            .get(&entry.api_name)
            .ok_or_else(|| DispatchError::UnknownFunction(call.qualified_name.clone()))?;

        let credential = self.credentials.resolve(&entry.api_name, overrides);
        tracing::debug!(api = %entry.api_name, credential = credential.kind(), "dispatching");
        backend.invoke(entry, call, &credential).await
    }

    fn entry(&self, qualified_name: &str) -> Result<&FunctionEntry, DispatchError> {
        self.registry
            .get(qualified_name)
            .ok_or_else(|| DispatchError::UnknownFunction(qualified_name.to_string()))
    }
}

impl std::fmt::Debug for DispatchBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.backends.keys().collect();
        names.sort();
        f.debug_struct("DispatchBridge")
            .field("backends", &names)
            .finish()
    }
}

/// Merge positional and named args into one map keyed by parameter name,
/// then validate against the entry's parameters.
///
/// Positional values fill `params` in order. Named values win over
/// positional ones for the same name.
pub(crate) fn bind_params(
    entry: &FunctionEntry,
    args: &mut CallArgs,
) -> Result<Map<String, JsonValue>, DispatchError> {
    let mut bound = Map::new();
    let positional = std::mem::take(&mut args.positional);
    if positional.len() > entry.params.len() {
        return Err(DispatchError::InvalidArguments(format!(
            "function '{}' takes at most {} positional arguments, got {}",
            entry.qualified_name,
            entry.params.len(),
            positional.len()
        )));
    }
    for (param, value) in entry.params.iter().zip(positional) {
        bound.insert(param.name.clone(), value);
    }
    for (key, value) in std::mem::take(&mut args.named) {
        bound.insert(key, value);
    }

    for param in &entry.params {
        match bound.get_mut(&param.name) {
            Some(value) if !value.is_null() => {
                coerce_param(entry, param, value)?;
                check_enum(entry, param, value)?;
                format::check_format(entry, param, value)?;
            }
            _ => {
                bound.remove(&param.name);
                if param.required && param.default.is_none() {
                    return Err(DispatchError::InvalidArguments(format!(
                        "missing required parameter '{}' for function '{}'",
                        param.name, entry.qualified_name
                    )));
                }
            }
        }
    }
    Ok(bound)
}

/// Lua numbers are doubles; an integer param accepts only integral ones.
fn coerce_param(entry: &FunctionEntry, param: &ParamSpec, value: &mut JsonValue) -> Result<(), DispatchError> {
    if param.param_type != "integer" || !value.is_f64() {
        return Ok(());
    }
    let Some(f) = value.as_f64() else {
        return Ok(());
    };
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        *value = JsonValue::from(f as i64);
        return Ok(());
    }
    Err(DispatchError::InvalidArguments(format!(
        "parameter '{}' for '{}' expects an integer, got {f}",
        param.name, entry.qualified_name
    )))
}

fn check_enum(
    entry: &FunctionEntry,
    param: &ParamSpec,
    value: &JsonValue,
) -> Result<(), DispatchError> {
    let Some(allowed) = &param.enum_values else {
        return Ok(());
    };
    let text = scalar_text(value);
    if allowed.iter().any(|a| *a == text) {
        return Ok(());
    }
    Err(DispatchError::InvalidArguments(format!(
        "parameter '{}' for '{}': expected one of [{}], got '{}'",
        param.name,
        entry.qualified_name,
        allowed.join(", "),
        text
    )))
}

/// Text form of a value for paths, queries and headers.
pub(crate) fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}
