//! OpenAPI 3.x document walking.

use std::collections::HashSet;

use serde_json::Value as JsonValue;

use scriptgate_types::{
    ApiConfig, AuthScheme, BodySpec, FieldDef, HttpMethod, Operation, ParamLocation, ParamSpec,
    SchemaDef, object_fields, ref_name, schema_type_name,
};

use super::{ApiCatalog, CatalogError, CatalogOptions};

pub(super) fn parse_document(
    api_name: &str,
    doc: &JsonValue,
    options: &CatalogOptions,
) -> Result<ApiCatalog, CatalogError> {
    match doc.get("openapi").and_then(|v| v.as_str()) {
        Some(version) if version.starts_with('3') => {}
        Some(version) => {
            return Err(CatalogError::Unsupported(format!("OpenAPI version {version}")));
        }
        None if doc.get("swagger").is_some() => {
            return Err(CatalogError::Unsupported(
                "Swagger 2.0 documents are not supported; convert to OpenAPI 3".to_string(),
            ));
        }
        None => {
            return Err(CatalogError::Invalid("missing 'openapi' version field".to_string()));
        }
    }

    let config = ApiConfig {
        name: api_name.to_string(),
        base_url: base_url(doc, options)?,
        description: doc
            .pointer("/info/description")
            .or_else(|| doc.pointer("/info/title"))
            .and_then(|v| v.as_str())
            .map(String::from),
        auth_scheme: auth_scheme(doc),
    };

    Ok(ApiCatalog {
        config,
        operations: operations(api_name, doc, options),
        schemas: schemas(api_name, doc),
    })
}

fn base_url(doc: &JsonValue, options: &CatalogOptions) -> Result<String, CatalogError> {
    if let Some(url) = &options.base_url {
        return Ok(url.trim_end_matches('/').to_string());
    }
    let server = doc
        .pointer("/servers/0/url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            CatalogError::Invalid("no base URL: set base_url or add a servers entry".to_string())
        })?;

    if server.starts_with("http://") || server.starts_with("https://") {
        return Ok(server.trim_end_matches('/').to_string());
    }

    // Relative server URLs resolve against the document's own location.
    let origin = options.document_url.as_deref().ok_or_else(|| {
        CatalogError::Invalid(format!("relative server URL '{server}' needs base_url"))
    })?;
    let joined = url::Url::parse(origin)
        .and_then(|u| u.join(server))
        .map_err(|e| CatalogError::Invalid(format!("bad server URL '{server}': {e}")))?;
    Ok(joined.as_str().trim_end_matches('/').to_string())
}

fn auth_scheme(doc: &JsonValue) -> Option<AuthScheme> {
    let schemes = doc.pointer("/components/securitySchemes")?.as_object()?;
    schemes.values().find_map(|scheme| {
        let kind = scheme.get("type")?.as_str()?;
        match kind {
            "http" => match scheme.get("scheme")?.as_str()?.to_ascii_lowercase().as_str() {
                "bearer" => Some(AuthScheme::bearer()),
                "basic" => Some(AuthScheme::Basic),
                _ => None,
            },
            "apiKey" if scheme.get("in").and_then(|v| v.as_str()) == Some("header") => {
                Some(AuthScheme::ApiKey {
                    header: scheme.get("name")?.as_str()?.to_string(),
                })
            }
            "oauth2" | "openIdConnect" => Some(AuthScheme::bearer()),
            _ => None,
        }
    })
}

fn operations(api_name: &str, doc: &JsonValue, options: &CatalogOptions) -> Vec<Operation> {
    let Some(paths) = doc.get("paths").and_then(|p| p.as_object()) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut operations = Vec::new();

    for (path, item) in paths {
        let Some(item) = item.as_object() else { continue };
        let shared = item.get("parameters");

        for (key, op) in item {
            let Some(method) = HttpMethod::from_key(key) else { continue };

            let mut name = op
                .get("operationId")
                .and_then(|v| v.as_str())
                .map(sanitize_identifier)
                .unwrap_or_else(|| derive_name(method, path));
            if !seen.insert(name.clone()) {
                let mut n = 2;
                while seen.contains(&format!("{name}_{n}")) {
                    n += 1;
                }
                name = format!("{name}_{n}");
                seen.insert(name.clone());
            }

            let mut parameters = parameters(doc, shared, op.get("parameters"), options);
            let (request_body, body_params) = request_body(doc, op, options);
            parameters.extend(body_params);

            operations.push(Operation {
                name,
                api_name: api_name.to_string(),
                http_method: method,
                path_template: path.clone(),
                parameters,
                request_body,
                response_shape: response_shape(doc, op),
                summary: str_field(op, "summary"),
                description: str_field(op, "description"),
                tags: op
                    .get("tags")
                    .and_then(|t| t.as_array())
                    .map(|t| t.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
                deprecated: op.get("deprecated").and_then(|v| v.as_bool()).unwrap_or(false),
            });
        }
    }

    operations
}

/// Path-level parameters first, overridden by operation-level ones with the
/// same name and location.
fn parameters(
    doc: &JsonValue,
    shared: Option<&JsonValue>,
    own: Option<&JsonValue>,
    options: &CatalogOptions,
) -> Vec<ParamSpec> {
    let mut specs: Vec<ParamSpec> = Vec::new();
    for list in [shared, own].into_iter().flatten() {
        let Some(list) = list.as_array() else { continue };
        for raw in list {
            let Some(spec) = param_spec(doc, resolve(doc, raw), options) else { continue };
            if let Some(existing) = specs
                .iter_mut()
                .find(|p| p.name == spec.name && p.location == spec.location)
            {
                *existing = spec;
            } else {
                specs.push(spec);
            }
        }
    }
    specs
}

fn param_spec(doc: &JsonValue, raw: &JsonValue, options: &CatalogOptions) -> Option<ParamSpec> {
    let name = raw.get("name")?.as_str()?;
    let location = match raw.get("in")?.as_str()? {
        "path" => ParamLocation::Path,
        "query" => ParamLocation::Query,
        "header" => ParamLocation::Header,
        _ => return None,
    };
    let schema = raw.get("schema").map(|s| resolve(doc, s));
    let required = location == ParamLocation::Path
        || raw.get("required").and_then(|v| v.as_bool()).unwrap_or(false);

    let param_type = schema.map(schema_type_name).unwrap_or_else(|| "string".to_string());
    let mut spec = if required {
        ParamSpec::required(name, location, param_type)
    } else {
        ParamSpec::optional(name, location, param_type)
    };
    spec.description = str_field(raw, "description").unwrap_or_default();
    if let Some(schema) = schema {
        spec.default = schema.get("default").cloned();
        spec.format = str_field(schema, "format");
        spec.enum_values = schema.get("enum").and_then(|e| e.as_array()).map(|values| {
            values
                .iter()
                .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
                .collect()
        });
    }
    spec.frozen_value = options.frozen_params.get(name).cloned();
    Some(spec)
}

fn request_body(
    doc: &JsonValue,
    op: &JsonValue,
    options: &CatalogOptions,
) -> (Option<BodySpec>, Vec<ParamSpec>) {
    let Some(body) = op.get("requestBody").map(|b| resolve(doc, b)) else {
        return (None, Vec::new());
    };
    let required = body.get("required").and_then(|v| v.as_bool()).unwrap_or(false);
    let Some(content) = body.get("content").and_then(|c| c.as_object()) else {
        return (None, Vec::new());
    };
    let schema = content
        .get("application/json")
        .or_else(|| {
            content
                .iter()
                .find(|(mime, _)| mime.contains("json"))
                .map(|(_, v)| v)
        })
        .and_then(|media| media.get("schema"));
    let Some(schema) = schema else {
        return (None, Vec::new());
    };

    if let Some(reference) = schema.get("$ref").and_then(|r| r.as_str()) {
        let spec = BodySpec {
            schema_name: ref_name(reference).to_string(),
            required,
        };
        return (Some(spec), Vec::new());
    }

    if schema.get("properties").is_some() {
        // Inline object bodies become individual body parameters.
        let params = object_fields(schema)
            .into_iter()
            .map(|field| {
                let mut spec = if field.required {
                    ParamSpec::required(&field.name, ParamLocation::Body, field.field_type)
                } else {
                    ParamSpec::optional(&field.name, ParamLocation::Body, field.field_type)
                };
                spec.description = field.description;
                spec.frozen_value = options.frozen_params.get(&field.name).cloned();
                spec
            })
            .collect();
        return (None, params);
    }

    let spec = BodySpec {
        schema_name: schema_type_name(schema),
        required,
    };
    (Some(spec), Vec::new())
}

fn response_shape(doc: &JsonValue, op: &JsonValue) -> Option<String> {
    let responses = op.get("responses")?.as_object()?;
    let mut codes: Vec<&String> = responses.keys().filter(|k| k.starts_with('2')).collect();
    codes.sort();
    codes.into_iter().find_map(|code| {
        let response = resolve(doc, responses.get(code.as_str())?);
        let content = response.get("content")?.as_object()?;
        let media = content
            .get("application/json")
            .or_else(|| content.values().next())?;
        media.get("schema").map(schema_type_name)
    })
}

fn schemas(api_name: &str, doc: &JsonValue) -> Vec<SchemaDef> {
    let Some(entries) = doc.pointer("/components/schemas").and_then(|s| s.as_object()) else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|(name, schema)| SchemaDef {
            name: name.clone(),
            api_name: api_name.to_string(),
            description: str_field(schema, "description"),
            fields: schema_fields(doc, schema),
        })
        .collect()
}

/// Object fields, merging `allOf` parts.
fn schema_fields(doc: &JsonValue, schema: &JsonValue) -> Vec<FieldDef> {
    let mut fields = object_fields(schema);
    if let Some(parts) = schema.get("allOf").and_then(|a| a.as_array()) {
        for part in parts {
            for field in object_fields(resolve(doc, part)) {
                if !fields.iter().any(|f| f.name == field.name) {
                    fields.push(field);
                }
            }
        }
    }
    fields
}

/// Follow a local `$ref` (`#/components/...`), returning the value itself
/// when it is not a reference or the target is missing.
fn resolve<'a>(doc: &'a JsonValue, value: &'a JsonValue) -> &'a JsonValue {
    value
        .get("$ref")
        .and_then(|r| r.as_str())
        .and_then(|r| r.strip_prefix('#'))
        .and_then(|pointer| doc.pointer(pointer))
        .unwrap_or(value)
}

fn str_field(value: &JsonValue, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}

/// Make an operationId usable as a script identifier.
pub(crate) fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// `GET /pets/{pet_id}` -> `get_pets_pet_id`.
fn derive_name(method: HttpMethod, path: &str) -> String {
    let slug: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| sanitize_identifier(s.trim_matches(|c| c == '{' || c == '}')))
        .collect();
    if slug.is_empty() {
        method.as_lower().to_string()
    } else {
        format!("{}_{}", method.as_lower(), slug.join("_"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn petstore() -> JsonValue {
        json!({
            "openapi": "3.0.3",
            "info": { "title": "Pets", "version": "1" },
            "servers": [{ "url": "http://localhost:9999/" }],
            "components": {
                "securitySchemes": { "bearerAuth": { "type": "http", "scheme": "bearer" } },
                "parameters": {
                    "PetId": { "name": "pet_id", "in": "path", "schema": { "type": "integer" } }
                },
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "required": ["id", "name"],
                        "properties": {
                            "id": { "type": "integer" },
                            "name": { "type": "string", "description": "Pet name" },
                            "tag": { "type": "string" }
                        }
                    },
                    "NewPet": { "type": "object", "properties": { "name": { "type": "string" } } }
                }
            },
            "paths": {
                "/pets": {
                    "get": {
                        "operationId": "list_pets",
                        "summary": "List pets",
                        "tags": ["pets"],
                        "parameters": [
                            { "name": "limit", "in": "query", "schema": { "type": "integer" } },
                            { "name": "status", "in": "query",
                              "schema": { "type": "string", "enum": ["active", "adopted"] } }
                        ],
                        "responses": { "200": { "description": "ok",
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/PetList" } } } } }
                    },
                    "post": {
                        "operationId": "create-pet",
                        "requestBody": { "required": true,
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/NewPet" } } } },
                        "responses": { "201": { "description": "created" } }
                    }
                },
                "/pets/{pet_id}": {
                    "parameters": [ { "$ref": "#/components/parameters/PetId" } ],
                    "get": { "responses": { "200": { "description": "ok",
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } } } } },
                    "patch": {
                        "operationId": "rename_pet",
                        "requestBody": { "content": { "application/json": { "schema": {
                            "type": "object", "required": ["name"],
                            "properties": { "name": { "type": "string" } } } } } },
                        "responses": { "200": { "description": "ok" } }
                    }
                }
            }
        })
    }

    fn parse(options: &CatalogOptions) -> ApiCatalog {
        parse_document("petstore", &petstore(), options).expect("parse failed")
    }

    #[test]
    fn test_config() {
        let catalog = parse(&CatalogOptions::default());
        assert_eq!(catalog.config.base_url, "http://localhost:9999");
        assert_eq!(catalog.config.description.as_deref(), Some("Pets"));
        assert_eq!(catalog.config.auth_scheme, Some(AuthScheme::bearer()));
    }

    #[test]
    fn test_operations() {
        let catalog = parse(&CatalogOptions::default());
        let names: Vec<&str> = catalog.operations.iter().map(|o| o.name.as_str()).collect();
        assert!(names.contains(&"list_pets"));
        assert!(names.contains(&"create_pet"), "sanitized operationId: {names:?}");
        assert!(names.contains(&"get_pets_pet_id"), "derived name: {names:?}");

        let list = catalog.operations.iter().find(|o| o.name == "list_pets").expect("list");
        assert_eq!(list.http_method, HttpMethod::Get);
        assert_eq!(list.tags, vec!["pets"]);
        assert_eq!(list.response_shape.as_deref(), Some("PetList"));
        let status = list.parameters.iter().find(|p| p.name == "status").expect("status");
        assert_eq!(status.location, ParamLocation::Query);
        assert_eq!(status.enum_values.as_deref(), Some(&["active".to_string(), "adopted".to_string()][..]));

        let get = catalog.operations.iter().find(|o| o.name == "get_pets_pet_id").expect("get");
        assert_eq!(get.parameters.len(), 1);
        assert_eq!(get.parameters[0].location, ParamLocation::Path);
        assert!(get.parameters[0].required);
        assert_eq!(get.parameters[0].param_type, "integer");
    }

    #[test]
    fn test_request_bodies() {
        let catalog = parse(&CatalogOptions::default());
        let create = catalog.operations.iter().find(|o| o.name == "create_pet").expect("create");
        let body = create.request_body.as_ref().expect("body");
        assert_eq!(body.schema_name, "NewPet");
        assert!(body.required);
        assert!(!create.has_visible_params());

        let rename = catalog.operations.iter().find(|o| o.name == "rename_pet").expect("rename");
        assert!(rename.request_body.is_none());
        let name = rename.parameters.iter().find(|p| p.name == "name").expect("name");
        assert_eq!(name.location, ParamLocation::Body);
        assert!(name.required);
    }

    #[test]
    fn test_schemas() {
        let catalog = parse(&CatalogOptions::default());
        let pet = catalog.schemas.iter().find(|s| s.name == "Pet").expect("Pet");
        assert_eq!(pet.fields.len(), 3);
        let name = pet.fields.iter().find(|f| f.name == "name").expect("name");
        assert!(name.required);
        assert_eq!(name.description, "Pet name");
    }

    #[test]
    fn test_frozen_and_base_url_override() {
        let mut options = CatalogOptions {
            base_url: Some("http://other:1/v2/".to_string()),
            ..Default::default()
        };
        options.frozen_params.insert("limit".to_string(), "5".to_string());
        let catalog = parse(&options);
        assert_eq!(catalog.config.base_url, "http://other:1/v2");
        let list = catalog.operations.iter().find(|o| o.name == "list_pets").expect("list");
        let limit = list.parameters.iter().find(|p| p.name == "limit").expect("limit");
        assert_eq!(limit.frozen_value.as_deref(), Some("5"));
        assert_eq!(list.visible_params().count(), 1);
    }

    #[test]
    fn test_relative_server_url() {
        let mut doc = petstore();
        doc["servers"] = json!([{ "url": "/api" }]);
        let options = CatalogOptions {
            document_url: Some("http://host:8000/openapi.json".to_string()),
            ..Default::default()
        };
        let catalog = parse_document("p", &doc, &options).expect("parse");
        assert_eq!(catalog.config.base_url, "http://host:8000/api");

        let err = parse_document("p", &doc, &CatalogOptions::default()).expect_err("no origin");
        assert!(err.to_string().contains("relative server URL"));
    }

    #[test]
    fn test_rejects_swagger2() {
        let err = parse_document("p", &json!({"swagger": "2.0"}), &CatalogOptions::default())
            .expect_err("swagger");
        assert!(matches!(err, CatalogError::Unsupported(_)));
    }
}
