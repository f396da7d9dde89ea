//! Request transport error taxonomy.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Coarse error classification.
///
/// Callers branch on this instead of inspecting transport internals: timeouts
/// are retried by the data loader, everything else is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    Http,
    Deserialize,
    Application,
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    /// The server answered but reported `success: false`.
    #[error("{0}")]
    Application(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Http { .. } => ErrorKind::Http,
            ApiError::Deserialize(_) => ErrorKind::Deserialize,
            ApiError::Application(_) => ErrorKind::Application,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// The message the server itself supplied, if any.
    ///
    /// Application errors carry it directly; HTTP errors carry it inside the
    /// response body.
    pub fn server_message(&self) -> Option<String> {
        match self {
            ApiError::Application(msg) => Some(msg.clone()),
            ApiError::Http { body, .. } => server_message(body),
            _ => None,
        }
    }
}

/// Error bodies produced by the analytics backend.
///
/// Flask handlers answer `{"success": false, "message": ...}`, FastAPI
/// handlers `{"detail": ...}`, and RFC7807 envelopes carry a `title`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    title: Option<String>,
}

/// Attempt to parse an error body into a user-facing message.
/// Prefers `message`, then a string `detail`, then `title`.
pub fn server_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    let detail = parsed.detail.and_then(|d| match d {
        Value::String(s) => Some(s),
        _ => None,
    });

    [parsed.message, detail, parsed.title]
        .into_iter()
        .flatten()
        .find(|msg| !msg.trim().is_empty())
}

/// Turn a `success: false` payload into an [`ApiError::Application`].
///
/// Payloads without a `success` field pass through untouched; the payload is
/// otherwise opaque to the client. `fallback` names the failed operation when
/// the server sent no message.
pub fn check_outcome(payload: Value, fallback: &str) -> Result<Value, ApiError> {
    if payload.get("success") == Some(&Value::Bool(false)) {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string();
        return Err(ApiError::Application(message));
    }
    Ok(payload)
}
