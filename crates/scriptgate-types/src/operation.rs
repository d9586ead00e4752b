//! REST operation descriptions and the parameter model shared by every
//! callable the registry exposes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP method of a REST operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Parse a method name as it appears as a key under an OpenAPI path item.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            "head" => Some(Self::Head),
            "options" => Some(Self::Options),
            _ => None,
        }
    }

    /// Lowercase name, used when deriving operation names.
    pub fn as_lower(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::Head => "head",
            Self::Options => "options",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_lower().to_ascii_uppercase())
    }
}

/// Where a parameter is bound when a call is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    /// Substituted into a `{name}` segment of the path template.
    Path,
    /// Appended to the query string.
    Query,
    /// Sent as a request header.
    Header,
    /// A field of the JSON request body.
    Body,
    /// A named property of a tool's input object.
    Argument,
}

/// Schema for one callable parameter.
///
/// Both REST parameters and tool input properties are described with this
/// type, so docs and argument binding never care which source a function
/// came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Binding location.
    pub location: ParamLocation,
    /// Type hint in script terms (string, integer, number, boolean, table, any)
    /// or a schema name.
    pub param_type: String,
    /// Whether the caller must supply this parameter.
    pub required: bool,
    /// Description for docs.
    #[serde(default)]
    pub description: String,
    /// Default value declared by the source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Allowed values, when the source declares an enum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Format hint (uuid, date-time, int64, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Value pinned by configuration. Frozen parameters are hidden from
    /// scripts and always sent with this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen_value: Option<String>,
}

impl ParamSpec {
    /// Create a required parameter.
    pub fn required(
        name: impl Into<String>,
        location: ParamLocation,
        param_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location,
            param_type: param_type.into(),
            required: true,
            description: String::new(),
            default: None,
            enum_values: None,
            format: None,
            frozen_value: None,
        }
    }

    /// Create an optional parameter.
    pub fn optional(
        name: impl Into<String>,
        location: ParamLocation,
        param_type: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, location, param_type)
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach a default value.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Restrict the parameter to a fixed set of values.
    pub fn with_enum(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Whether docs should mark this parameter optional.
    ///
    /// A parameter with a declared default is optional even if the source
    /// lists it as required.
    pub fn is_optional(&self) -> bool {
        !self.required || self.default.is_some()
    }

    /// Whether configuration pins this parameter.
    pub fn is_frozen(&self) -> bool {
        self.frozen_value.is_some()
    }
}

/// A named request body, referenced by schema name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySpec {
    /// Schema name, or a plain type for inline non-object bodies.
    pub schema_name: String,
    /// Whether a body must be sent.
    pub required: bool,
}

/// One REST endpoint.
///
/// Immutable once the catalog has built it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Function name (the operationId, or derived from method and path).
    pub name: String,
    /// Owning API.
    pub api_name: String,
    pub http_method: HttpMethod,
    /// Path template with `{param}` placeholders, relative to the base URL.
    pub path_template: String,
    /// Declared parameters, in document order.
    pub parameters: Vec<ParamSpec>,
    /// Named request body, when the document describes one by reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<BodySpec>,
    /// Shape of a successful response (schema name or type).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_shape: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

impl Operation {
    /// Parameters visible to scripts (frozen ones removed).
    pub fn visible_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.parameters.iter().filter(|p| !p.is_frozen())
    }

    /// Whether the script passes anything besides an optional body.
    pub fn has_visible_params(&self) -> bool {
        self.visible_params().next().is_some()
    }
}

/// Field of a named data shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: String,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// A named data shape from an API's component schemas or a tool's `$defs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    /// API or tool server that declared it.
    pub api_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
}

/// How an API expects credentials, as declared by its interface document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: <prefix><token>`.
    Bearer { header: String, prefix: String },
    /// Raw key in a named header.
    ApiKey { header: String },
    /// HTTP basic authentication.
    Basic,
}

impl AuthScheme {
    /// The conventional `Authorization: Bearer` scheme.
    pub fn bearer() -> Self {
        Self::Bearer {
            header: "Authorization".to_string(),
            prefix: "Bearer ".to_string(),
        }
    }
}

/// Per-API settings derived from the document and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub auth_scheme: Option<AuthScheme>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_key() {
        assert_eq!(HttpMethod::from_key("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::from_key("PATCH"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::from_key("parameters"), None);
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_default_makes_param_optional() {
        let p = ParamSpec::required("limit", ParamLocation::Argument, "integer")
            .with_default(serde_json::json!(10));
        assert!(p.required);
        assert!(p.is_optional());

        let q = ParamSpec::required("id", ParamLocation::Path, "integer");
        assert!(!q.is_optional());
    }

    #[test]
    fn test_visible_params_skip_frozen() {
        let mut frozen = ParamSpec::optional("api_version", ParamLocation::Query, "string");
        frozen.frozen_value = Some("2".to_string());
        let op = Operation {
            name: "list".to_string(),
            api_name: "a".to_string(),
            http_method: HttpMethod::Get,
            path_template: "/items".to_string(),
            parameters: vec![frozen],
            request_body: None,
            response_shape: None,
            summary: None,
            description: None,
            tags: vec![],
            deprecated: false,
        };
        assert!(!op.has_visible_params());
    }
}
