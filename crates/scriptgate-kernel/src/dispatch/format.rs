//! Checks for declared string formats, run before dispatch.
//!
//! Unknown formats pass. Non-string values are left to the backend, except
//! for `int32`/`int64`, which look at the value's text form.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;

use scriptgate_types::{DispatchError, FunctionEntry, ParamSpec};

use super::scalar_text;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap()
});

static HOSTNAME_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").unwrap()
});

pub(super) fn check_format(
    entry: &FunctionEntry,
    param: &ParamSpec,
    value: &JsonValue,
) -> Result<(), DispatchError> {
    let Some(format) = param.format.as_deref() else {
        return Ok(());
    };
    let text = match (format, value) {
        (_, JsonValue::String(s)) => s.clone(),
        ("int32" | "int64", JsonValue::Number(_)) => scalar_text(value),
        _ => return Ok(()),
    };
    match matches_format(format, &text) {
        Some(false) => Err(DispatchError::InvalidArguments(format!(
            "parameter '{}' for '{}': expected {format} format, got '{text}'",
            param.name, entry.qualified_name
        ))),
        _ => Ok(()),
    }
}

/// `None` for formats without a check.
fn matches_format(format: &str, value: &str) -> Option<bool> {
    let valid = match format {
        // Only the hyphenated form; `Uuid::try_parse` also takes braced and URN forms.
        "uuid" => value.len() == 36 && uuid::Uuid::try_parse(value).is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(value).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        "email" => EMAIL.is_match(value),
        "uri" | "url" => url::Url::parse(value).is_ok(),
        "ipv4" => value.parse::<Ipv4Addr>().is_ok(),
        "ipv6" => value.parse::<Ipv6Addr>().is_ok(),
        "hostname" => is_hostname(value),
        "int32" => value.parse::<i32>().is_ok(),
        "int64" => value.parse::<i64>().is_ok(),
        _ => return None,
    };
    Some(valid)
}

fn is_hostname(value: &str) -> bool {
    let value = value.strip_suffix('.').unwrap_or(value);
    !value.is_empty() && value.len() <= 253 && value.split('.').all(|label| HOSTNAME_LABEL.is_match(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use scriptgate_types::{HttpMethod, Operation, ParamLocation};
    use serde_json::json;
    use std::sync::Arc;

    #[rstest]
    #[case("uuid", "550e8400-e29b-41d4-a716-446655440000", true)]
    #[case("uuid", "550e8400e29b41d4a716446655440000", false)]
    #[case("uuid", "not-a-uuid", false)]
    #[case("date-time", "2024-01-15T10:30:00Z", true)]
    #[case("date-time", "2024-01-15T10:30:00.123+05:30", true)]
    #[case("date-time", "2024-01-15", false)]
    #[case("date", "2024-02-29", true)]
    #[case("date", "2023-02-29", false)]
    #[case("email", "user@example.com", true)]
    #[case("email", "user@localhost", false)]
    #[case("uri", "https://example.com/path?q=1", true)]
    #[case("uri", "no scheme here", false)]
    #[case("ipv4", "192.168.1.1", true)]
    #[case("ipv4", "256.1.1.1", false)]
    #[case("ipv6", "::1", true)]
    #[case("ipv6", "192.168.1.1", false)]
    #[case("hostname", "api.example.com", true)]
    #[case("hostname", "-bad.example.com", false)]
    #[case("int32", "2147483647", true)]
    #[case("int32", "2147483648", false)]
    fn test_known_formats(#[case] format: &str, #[case] value: &str, #[case] valid: bool) {
        assert_eq!(matches_format(format, value), Some(valid));
    }

    #[test]
    fn test_unknown_format_passes() {
        assert_eq!(matches_format("binary", "anything"), None);
    }

    #[test]
    fn test_error_names_param_and_function() {
        let mut param = ParamSpec::required("pet_uuid", ParamLocation::Query, "string");
        param.format = Some("uuid".to_string());
        let entry = FunctionEntry::from_operation(
            Arc::new(Operation {
                name: "find_pet".to_string(),
                api_name: "petstore".to_string(),
                http_method: HttpMethod::Get,
                path_template: "/pets".to_string(),
                parameters: vec![param.clone()],
                request_body: None,
                response_shape: None,
                summary: None,
                description: None,
                tags: vec![],
                deprecated: false,
            }),
            true,
        );

        let err = check_format(&entry, &param, &json!("abc")).expect_err("bad uuid");
        assert_eq!(
            err.to_string(),
            "parameter 'pet_uuid' for 'find_pet': expected uuid format, got 'abc'"
        );
        assert!(check_format(&entry, &param, &json!(7)).is_ok());
    }
}
