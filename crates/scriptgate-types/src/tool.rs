//! Tool descriptors discovered from external tool servers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::operation::{FieldDef, ParamLocation, ParamSpec, SchemaDef};

/// A remotely discovered callable with a declared input shape.
///
/// Immutable once discovered. `params` is derived from `input_schema` at
/// construction so docs and argument binding never re-parse the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name as the server reports it.
    pub name: String,
    /// Configured name of the server that owns it.
    pub api_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema of the tool's arguments object.
    pub input_schema: Map<String, JsonValue>,
    /// Parameters derived from `input_schema`: required first, then optional.
    pub params: Vec<ParamSpec>,
}

impl ToolDescriptor {
    /// Build a descriptor, deriving parameter specs from the input schema.
    pub fn new(
        api_name: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Map<String, JsonValue>,
    ) -> Self {
        let params = params_from_input_schema(&input_schema);
        Self {
            name: name.into(),
            api_name: api_name.into(),
            description,
            input_schema,
            params,
        }
    }

    /// Named shapes declared under `$defs` or `definitions`.
    pub fn schema_defs(&self) -> Vec<SchemaDef> {
        let mut defs = Vec::new();
        for key in ["$defs", "definitions"] {
            let Some(entries) = self.input_schema.get(key).and_then(|d| d.as_object()) else {
                continue;
            };
            for (name, schema) in entries {
                defs.push(SchemaDef {
                    name: name.clone(),
                    api_name: self.api_name.clone(),
                    description: schema
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(String::from),
                    fields: object_fields(schema),
                });
            }
        }
        defs
    }
}

/// Convert a tool input schema into parameter specs.
///
/// Required properties come first so positional arguments map onto them
/// before any optional ones.
pub fn params_from_input_schema(schema: &Map<String, JsonValue>) -> Vec<ParamSpec> {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut required_params = Vec::new();
    let mut optional_params = Vec::new();

    for (name, prop) in properties {
        let is_required = required.contains(&name.as_str());
        let mut spec = if is_required {
            ParamSpec::required(name, ParamLocation::Argument, schema_type_name(prop))
        } else {
            ParamSpec::optional(name, ParamLocation::Argument, schema_type_name(prop))
        };
        if let Some(desc) = prop.get("description").and_then(|d| d.as_str()) {
            spec.description = desc.to_string();
        }
        spec.default = prop.get("default").cloned();
        spec.enum_values = enum_strings(prop);
        spec.format = prop.get("format").and_then(|f| f.as_str()).map(String::from);

        if is_required {
            required_params.push(spec);
        } else {
            optional_params.push(spec);
        }
    }

    required_params.extend(optional_params);
    required_params
}

/// Script-facing type name for a JSON Schema fragment.
///
/// `$ref` resolves to the referenced name, arrays render as `{item}`,
/// objects as `table`, and anything undeclared as `any`.
pub fn schema_type_name(schema: &JsonValue) -> String {
    if let Some(reference) = schema.get("$ref").and_then(|r| r.as_str()) {
        return ref_name(reference).to_string();
    }
    let ty = match schema.get("type") {
        Some(JsonValue::String(s)) => s.as_str(),
        // ["string", "null"] style nullable unions
        Some(JsonValue::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .find(|t| *t != "null")
            .unwrap_or("any"),
        _ => {
            if schema.get("properties").is_some() {
                "object"
            } else {
                "any"
            }
        }
    };
    match ty {
        "string" => "string".to_string(),
        "integer" => "integer".to_string(),
        "number" => "number".to_string(),
        "boolean" => "boolean".to_string(),
        "array" => {
            let item = schema
                .get("items")
                .map(schema_type_name)
                .unwrap_or_else(|| "any".to_string());
            format!("{{{item}}}")
        }
        "object" => "table".to_string(),
        _ => "any".to_string(),
    }
}

/// Last path segment of a JSON reference (`#/components/schemas/Pet` -> `Pet`).
pub fn ref_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Fields of an object schema, in property order.
pub fn object_fields(schema: &JsonValue) -> Vec<FieldDef> {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| FieldDef {
            name: name.clone(),
            field_type: schema_type_name(prop),
            required: required.contains(&name.as_str()),
            description: prop
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("")
                .to_string(),
        })
        .collect()
}

fn enum_strings(schema: &JsonValue) -> Option<Vec<String>> {
    let values = schema.get("enum")?.as_array()?;
    Some(
        values
            .iter()
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_params_required_first() {
        let schema = object(json!({
            "type": "object",
            "properties": {
                "include_email": { "type": "boolean", "default": false },
                "user_id": { "type": "string", "description": "User ID" }
            },
            "required": ["user_id"]
        }));
        let tool = ToolDescriptor::new("mock", "get_user", None, schema);

        assert_eq!(tool.params.len(), 2);
        assert_eq!(tool.params[0].name, "user_id");
        assert!(!tool.params[0].is_optional());
        assert_eq!(tool.params[0].description, "User ID");
        assert_eq!(tool.params[1].name, "include_email");
        assert!(tool.params[1].is_optional());
        assert_eq!(tool.params[1].default, Some(json!(false)));
    }

    #[test]
    fn test_schema_type_names() {
        assert_eq!(schema_type_name(&json!({"type": "integer"})), "integer");
        assert_eq!(
            schema_type_name(&json!({"$ref": "#/components/schemas/Pet"})),
            "Pet"
        );
        assert_eq!(
            schema_type_name(&json!({"type": "array", "items": {"$ref": "#/$defs/Item"}})),
            "{Item}"
        );
        assert_eq!(schema_type_name(&json!({"type": ["string", "null"]})), "string");
        assert_eq!(schema_type_name(&json!({})), "any");
    }

    #[test]
    fn test_schema_defs() {
        let schema = object(json!({
            "type": "object",
            "properties": { "item": { "$ref": "#/$defs/Item" } },
            "$defs": {
                "Item": {
                    "type": "object",
                    "properties": { "id": { "type": "integer" } },
                    "required": ["id"]
                }
            }
        }));
        let tool = ToolDescriptor::new("mock", "put_item", None, schema);
        let defs = tool.schema_defs();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "Item");
        assert_eq!(defs[0].fields[0].name, "id");
        assert!(defs[0].fields[0].required);
    }

    #[test]
    fn test_no_properties() {
        let tool = ToolDescriptor::new("mock", "no_params", None, object(json!({"type": "object"})));
        assert!(tool.params.is_empty());
    }
}
