//! Documentation search over functions and schemas.

use serde::Serialize;

use scriptgate_types::{FunctionEntry, SchemaDef};

use super::LookupError;

const SNIPPET_MAX: usize = 160;

/// Why an entry matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchType {
    #[serde(rename = "function-name")]
    FunctionName,
    #[serde(rename = "schema-name")]
    SchemaName,
    #[serde(rename = "description")]
    Description,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub name: String,
    pub api: String,
    /// `function` for REST entries, `mcp_tool` for tool entries, `schema`
    /// for data shapes.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub match_type: MatchType,
    pub snippet: String,
}

/// Name matches rank first, functions before schemas, then text matches in
/// the same order.
pub(super) fn search(
    entries: &[FunctionEntry],
    schemas: &[SchemaDef],
    query: &str,
) -> Result<Vec<SearchHit>, LookupError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(LookupError::EmptyQuery);
    }

    let mut by_name = Vec::new();
    let mut by_text = Vec::new();
    for entry in entries {
        if entry.qualified_name.to_lowercase().contains(&needle) {
            let snippet = entry
                .summary
                .clone()
                .unwrap_or_else(|| super::signature(entry));
            by_name.push(hit(entry, MatchType::FunctionName, snippet));
        } else if let Some(snippet) = text_match(entry, &needle) {
            by_text.push(hit(entry, MatchType::Description, snippet));
        }
    }

    let mut schema_text = Vec::new();
    for schema in schemas {
        if schema.name.to_lowercase().contains(&needle) {
            let snippet = schema.description.clone().unwrap_or_else(|| format!("@class {}", schema.name));
            by_name.push(schema_hit(schema, MatchType::SchemaName, snippet));
        } else if let Some(snippet) = schema_match(schema, &needle) {
            schema_text.push(schema_hit(schema, MatchType::Description, snippet));
        }
    }

    by_name.extend(by_text);
    by_name.extend(schema_text);
    Ok(by_name)
}

fn schema_hit(schema: &SchemaDef, match_type: MatchType, snippet: String) -> SearchHit {
    SearchHit {
        name: schema.name.clone(),
        api: schema.api_name.clone(),
        kind: "schema",
        match_type,
        snippet: truncate(snippet.trim()),
    }
}

fn schema_match(schema: &SchemaDef, needle: &str) -> Option<String> {
    if let Some(line) = schema
        .description
        .iter()
        .flat_map(|text| text.lines())
        .find(|line| line.to_lowercase().contains(needle))
    {
        return Some(line.to_string());
    }
    schema
        .fields
        .iter()
        .find(|f| f.name.to_lowercase().contains(needle) || f.description.to_lowercase().contains(needle))
        .map(|f| {
            if f.description.is_empty() {
                format!("field {}", f.name)
            } else {
                format!("field {}: {}", f.name, f.description)
            }
        })
}

fn hit(entry: &FunctionEntry, match_type: MatchType, snippet: String) -> SearchHit {
    SearchHit {
        name: entry.qualified_name.clone(),
        api: entry.api_name.clone(),
        kind: entry.source.search_type(),
        match_type,
        snippet: truncate(snippet.trim()),
    }
}

/// First summary, description or parameter line containing the needle.
fn text_match(entry: &FunctionEntry, needle: &str) -> Option<String> {
    let prose = entry
        .summary
        .iter()
        .chain(entry.description.iter())
        .flat_map(|text| text.lines());
    for line in prose {
        if line.to_lowercase().contains(needle) {
            return Some(line.to_string());
        }
    }
    entry
        .params
        .iter()
        .find(|p| {
            p.name.to_lowercase().contains(needle) || p.description.to_lowercase().contains(needle)
        })
        .map(|p| {
            if p.description.is_empty() {
                format!("parameter {}", p.name)
            } else {
                format!("parameter {}: {}", p.name, p.description)
            }
        })
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX {
        return text.to_string();
    }
    let cut: String = text.chars().take(SNIPPET_MAX).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptgate_types::{FieldDef, HttpMethod, Operation, ParamLocation, ParamSpec, ToolDescriptor};
    use serde_json::json;
    use std::sync::Arc;

    fn rest(name: &str, summary: &str, params: Vec<ParamSpec>) -> FunctionEntry {
        FunctionEntry::from_operation(
            Arc::new(Operation {
                name: name.to_string(),
                api_name: "petstore".to_string(),
                http_method: HttpMethod::Get,
                path_template: "/".to_string(),
                parameters: params,
                request_body: None,
                response_shape: None,
                summary: Some(summary.to_string()),
                description: None,
                tags: vec![],
                deprecated: false,
            }),
            true,
        )
    }

    fn tool(name: &str, description: &str) -> FunctionEntry {
        let serde_json::Value::Object(schema) = json!({ "type": "object" }) else {
            unreachable!()
        };
        FunctionEntry::from_tool(Arc::new(ToolDescriptor::new(
            "mock",
            name,
            Some(description.to_string()),
            schema,
        )))
    }

    fn entries() -> Vec<FunctionEntry> {
        vec![
            rest("list_pets", "List all pets", vec![]),
            rest(
                "list_owner_pets",
                "Owner listing",
                vec![ParamSpec::required("owner_id", ParamLocation::Path, "integer")
                    .with_description("Owner of the PETS")],
            ),
            tool("get_user", "Fetch a user, optionally with pets"),
            tool("echo", "Echo text"),
        ]
    }

    #[test]
    fn test_name_matches_rank_first() {
        let hits = search(&entries(), &[], "PETS").expect("search");
        let names: Vec<_> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["list_pets", "list_owner_pets", "mock.get_user"]);
        assert_eq!(hits[0].match_type, MatchType::FunctionName);
        assert_eq!(hits[2].match_type, MatchType::Description);
        assert_eq!(hits[2].kind, "mcp_tool");
        assert_eq!(hits[0].kind, "function");
        assert_eq!(hits[2].snippet, "Fetch a user, optionally with pets");
    }

    #[test]
    fn test_parameter_match() {
        let hits = search(&entries(), &[], "owner_id").expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "parameter owner_id: Owner of the PETS");
    }

    #[test]
    fn test_empty_query_rejected() {
        assert_eq!(search(&entries(), &[], "   "), Err(LookupError::EmptyQuery));
        assert!(search(&entries(), &[], "zzz").expect("search").is_empty());
    }

    fn schemas() -> Vec<SchemaDef> {
        vec![SchemaDef {
            name: "Pet".to_string(),
            api_name: "petstore".to_string(),
            description: Some("A pet in the store".to_string()),
            fields: vec![FieldDef {
                name: "owner_id".to_string(),
                field_type: "integer".to_string(),
                required: false,
                description: "Who owns the pet".to_string(),
            }],
        }]
    }

    #[test]
    fn test_schema_hits_follow_functions() {
        let hits = search(&entries(), &schemas(), "pet").expect("search");
        let names: Vec<_> = hits.iter().map(|h| (h.name.as_str(), h.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("list_pets", "function"),
                ("list_owner_pets", "function"),
                ("Pet", "schema"),
                ("mock.get_user", "mcp_tool"),
            ]
        );
        assert_eq!(hits[2].match_type, MatchType::SchemaName);
        assert_eq!(hits[2].snippet, "A pet in the store");

        let hits = search(&entries(), &schemas(), "who owns").expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, "schema");
        assert_eq!(hits[0].api, "petstore");
        assert_eq!(hits[0].snippet, "field owner_id: Who owns the pet");
    }

    #[test]
    fn test_serialized_shape() {
        let hits = search(&entries(), &[], "echo").expect("search");
        let value = serde_json::to_value(&hits[0]).expect("json");
        assert_eq!(value["type"], "mcp_tool");
        assert_eq!(value["match_type"], "function-name");
        assert_eq!(value["name"], "mock.echo");
    }
}
