//! The `execute_script` response envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One successful file write, in write order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputManifestEntry {
    #[serde(rename = "name")]
    pub relative_name: String,
    #[serde(rename = "bytes")]
    pub byte_count: u64,
}

/// Counters reported with every execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Backend calls dispatched (rejected calls are not counted).
    pub api_calls: u64,
    /// Wall-clock time from context creation to report.
    pub duration_ms: u64,
}

/// Terminal states other than `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    #[serde(rename = "timeout")]
    TimedOut,
    QuotaExceeded,
    SandboxViolation,
    ScriptError,
}

impl ExecutionErrorKind {
    /// Fatal kinds cannot be caught by the script's own error handling.
    pub fn is_abort(&self) -> bool {
        !matches!(self, Self::ScriptError)
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TimedOut => "timeout",
            Self::QuotaExceeded => "quota_exceeded",
            Self::SandboxViolation => "sandbox_violation",
            Self::ScriptError => "script_error",
        })
    }
}

/// Why an execution did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: ExecutionErrorKind,
    #[serde(rename = "error")]
    pub message: String,
}

/// Response envelope for one script execution.
///
/// `logs`, `stats` and `files_written` are present on failure too, holding
/// whatever the script produced before it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub result: serde_json::Value,
    pub logs: Vec<String>,
    pub stats: ExecutionStats,
    pub files_written: Vec<OutputManifestEntry>,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn error_kind(&self) -> Option<ExecutionErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let report = ExecutionReport {
            result: json!({"total": 4}),
            logs: vec!["hello".to_string()],
            stats: ExecutionStats {
                api_calls: 1,
                duration_ms: 12,
            },
            files_written: vec![OutputManifestEntry {
                relative_name: "out.txt".to_string(),
                byte_count: 5,
            }],
            failure: None,
        };
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["result"]["total"], 4);
        assert_eq!(value["stats"]["api_calls"], 1);
        assert_eq!(value["files_written"][0]["name"], "out.txt");
        assert_eq!(value["files_written"][0]["bytes"], 5);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_fields_inline() {
        let report = ExecutionReport {
            result: serde_json::Value::Null,
            logs: vec![],
            stats: ExecutionStats::default(),
            files_written: vec![],
            failure: Some(ExecutionFailure {
                kind: ExecutionErrorKind::TimedOut,
                message: "script execution timed out after 100ms".to_string(),
            }),
        };
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["kind"], "timeout");
        assert!(value["error"].as_str().unwrap_or("").contains("timed out"));
        assert!(ExecutionErrorKind::TimedOut.is_abort());
        assert!(!ExecutionErrorKind::ScriptError.is_abort());
    }
}
