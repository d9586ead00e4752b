//! Backend call errors.

use thiserror::Error;

use crate::function::FunctionSource;

/// A backend answered, but not with success.
///
/// Raised for non-2xx REST responses, tool calls that report an error, and
/// transport failures (`status: None`). Scripts see it as a catchable error
/// value carrying `status`, `body` and `message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub source_kind: FunctionSource,
    /// HTTP status, when the backend is a REST API that answered.
    pub status: Option<u16>,
    /// Raw response body or joined tool error text.
    pub body: String,
    /// Human-readable summary.
    pub message: String,
}

impl UpstreamError {
    /// Non-2xx REST response.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        Self {
            source_kind: FunctionSource::Rest,
            status: Some(status),
            body,
            message,
        }
    }

    /// The REST request never produced a response.
    pub fn request_failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            source_kind: FunctionSource::Rest,
            status: None,
            message: format!("request failed: {reason}"),
            body: reason,
        }
    }

    /// A tool call reported failure, or the round-trip itself failed.
    pub fn tool(qualified: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            source_kind: FunctionSource::Tool,
            status: None,
            message: format!("tool '{qualified}' returned an error: {text}"),
            body: text,
        }
    }

    /// Whether the backend rejected the caller's credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

/// Why a dispatched call did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
