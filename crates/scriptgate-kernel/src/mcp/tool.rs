//! Conversions between rmcp tool types and scriptgate descriptors/values.

use rmcp::model::{CallToolResult, RawContent, Tool as McpTool};
use serde_json::Value as JsonValue;

use scriptgate_types::{ToolDescriptor, UpstreamError};

/// Describe a discovered MCP tool for the registry.
pub fn descriptor_from_tool(api_name: &str, tool: &McpTool) -> ToolDescriptor {
    ToolDescriptor::new(
        api_name,
        tool.name.to_string(),
        tool.description.as_ref().map(|d| d.to_string()),
        (*tool.input_schema).clone(),
    )
}

/// Decode a tool result into a script value.
///
/// Structured content wins. Otherwise text items are used: one item becomes
/// a value (parsed when it is a JSON object or array, else a string), several
/// become an array. A result flagged `is_error` becomes an `UpstreamError`
/// carrying the joined text.
pub fn decode_result(qualified: &str, result: CallToolResult) -> Result<JsonValue, UpstreamError> {
    let texts = content_texts(&result);

    if result.is_error.unwrap_or(false) {
        return Err(UpstreamError::tool(qualified, texts.join("\n")));
    }

    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }

    Ok(match texts.len() {
        0 => JsonValue::Null,
        1 => decode_text(&texts[0]),
        _ => JsonValue::Array(texts.iter().map(|t| decode_text(t)).collect()),
    })
}

fn decode_text(text: &str) -> JsonValue {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(text) {
            return value;
        }
    }
    JsonValue::String(text.to_string())
}

fn content_texts(result: &CallToolResult) -> Vec<String> {
    result
        .content
        .iter()
        .map(|content| match &content.raw {
            RawContent::Text(text) => text.text.clone(),
            RawContent::Image(img) => format!("[image: {}]", img.mime_type),
            RawContent::Audio(audio) => format!("[audio: {}]", audio.mime_type),
            RawContent::ResourceLink(res) => format!("[resource-link: {}]", res.uri),
            RawContent::Resource(_) => "[resource]".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;

    #[test]
    fn test_single_text_json_object_is_parsed() {
        let result = CallToolResult::success(vec![Content::text(r#"{"id":"u1","name":"Alice"}"#)]);
        let value = decode_result("mock.get_user", result).expect("decode");
        assert_eq!(value["name"], "Alice");
    }

    #[test]
    fn test_plain_text_stays_string() {
        let result = CallToolResult::success(vec![Content::text("hello")]);
        assert_eq!(decode_result("mock.echo", result).expect("decode"), json!("hello"));

        let result = CallToolResult::success(vec![Content::text("42")]);
        assert_eq!(decode_result("mock.echo", result).expect("decode"), json!("42"));
    }

    #[test]
    fn test_multiple_items_become_array() {
        let result = CallToolResult::success(vec![Content::text("a"), Content::text("[1]")]);
        assert_eq!(decode_result("m.t", result).expect("decode"), json!(["a", [1]]));
    }

    #[test]
    fn test_error_result() {
        let result = CallToolResult::error(vec![Content::text("intentional failure")]);
        let err = decode_result("mock.failing_tool", result).expect_err("should fail");
        assert_eq!(err.body, "intentional failure");
        assert!(err.message.contains("mock.failing_tool"));
    }

    #[test]
    fn test_structured_content_preferred() {
        let mut result = CallToolResult::success(vec![Content::text("ignored")]);
        result.structured_content = Some(json!({"sum": 3}));
        assert_eq!(decode_result("m.add", result).expect("decode"), json!({"sum": 3}));
    }
}
