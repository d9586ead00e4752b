//! Luau-annotation rendering for `get_function_docs` and `get_schema`.
//!
//! ```lua
//! --- Get a pet by id
//! ---
//! --- Returns a single pet.
//! ---
//! --- @param pet_id integer
//! --- @return Pet
//! function sdk.get_pet(params) end
//! ```

use scriptgate_types::{FunctionEntry, FunctionTarget, ParamSpec, SchemaDef};

/// Render the annotation block for one function.
pub fn render_function_docs(entry: &FunctionEntry) -> String {
    let mut lines = Vec::new();

    if let Some(summary) = &entry.summary {
        lines.push(format!("--- {}", summary.trim()));
    }
    if let Some(description) = entry.description.as_deref().map(str::trim) {
        // Tool summaries are the description's first line; skip the repeat.
        let repeated = entry.summary.as_deref().map(str::trim) == Some(description);
        if !description.is_empty() && !repeated {
            lines.push("---".to_string());
            for line in description.lines().map(str::trim) {
                if line.is_empty() {
                    lines.push("---".to_string());
                } else {
                    lines.push(format!("--- {line}"));
                }
            }
        }
    }
    if !lines.is_empty() {
        lines.push("---".to_string());
    }

    let operation = match &entry.target {
        FunctionTarget::Rest(op) => Some(op.as_ref()),
        FunctionTarget::Tool(_) => None,
    };
    if operation.is_some_and(|op| op.deprecated) {
        lines.push("--- @deprecated".to_string());
    }

    for param in &entry.params {
        lines.push(param_line(param));
    }
    if let Some(body) = operation.and_then(|op| op.request_body.as_ref()) {
        let marker = if body.required { "" } else { "?" };
        lines.push(format!("--- @param body{marker} {}", body.schema_name));
    }
    if let Some(shape) = entry.response_shape() {
        lines.push(format!("--- @return {shape}"));
    }

    lines.push(format!(
        "function sdk.{}({}) end",
        entry.qualified_name,
        call_arguments(entry).join(", ")
    ));
    lines.join("\n")
}

/// Render the annotation block for a named data shape.
pub fn render_schema_docs(schema: &SchemaDef) -> String {
    let mut lines = Vec::new();
    if let Some(description) = schema.description.as_deref().map(str::trim) {
        if !description.is_empty() {
            lines.push(format!("--- {description}"));
        }
    }
    lines.push(format!("--- @class {}", schema.name));
    for field in &schema.fields {
        let marker = if field.required { "" } else { "?" };
        lines.push(
            format!(
                "--- @field {}{marker} {} {}",
                field.name,
                field.field_type,
                field.description.trim()
            )
            .trim_end()
            .to_string(),
        );
    }
    lines.join("\n")
}

/// Short call form for listings: `sdk.get_pet(pet_id, body?)`.
pub fn signature(entry: &FunctionEntry) -> String {
    let mut names: Vec<String> = entry
        .params
        .iter()
        .map(|p| {
            if p.is_optional() {
                format!("{}?", p.name)
            } else {
                p.name.clone()
            }
        })
        .collect();
    if let FunctionTarget::Rest(op) = &entry.target {
        if let Some(body) = &op.request_body {
            names.push(if body.required { "body" } else { "body?" }.to_string());
        }
    }
    format!("sdk.{}({})", entry.qualified_name, names.join(", "))
}

/// Argument slots the script passes: a params table and, for REST
/// functions with a request body, the body.
fn call_arguments(entry: &FunctionEntry) -> Vec<&'static str> {
    let mut args = Vec::new();
    if !entry.params.is_empty() {
        args.push("params");
    }
    if let FunctionTarget::Rest(op) = &entry.target {
        if op.request_body.is_some() {
            args.push("body");
        }
    }
    args
}

fn param_line(param: &ParamSpec) -> String {
    let marker = if param.is_optional() { "?" } else { "" };
    let ty = match &param.enum_values {
        Some(values) => values
            .iter()
            .map(|v| format!("\"{v}\""))
            .collect::<Vec<_>>()
            .join("|"),
        None => param.param_type.clone(),
    };
    let mut line = format!("--- @param {}{marker} {ty}", param.name);
    let description = param.description.trim();
    if !description.is_empty() {
        line.push(' ');
        line.push_str(description);
    }
    if let Some(default) = &param.default {
        line.push_str(&format!(" (default: {default})"));
    }
    line
}
