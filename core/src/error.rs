//! Error types for the backend client.
//!
//! # Design
//! `ApiError` is the transport-level error every `parse_*` method and every
//! `Transport` returns. `NotFound` gets a dedicated variant because callers
//! frequently distinguish "no such row" from other failures. All other
//! non-2xx responses land in `Backend` with the message the service sent.
//!
//! `TodoError` is what the todo service hands to the UI: its `Display` is a
//! fixed localized sentence and the underlying `ApiError` stays reachable
//! through `source()`.

use serde::Deserialize;
use thiserror::Error;

/// Errors returned by `parse_*` methods and transports.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 404, or a single-row request that matched nothing.
    #[error("resource not found")]
    NotFound,

    /// Any other non-2xx response.
    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The request never produced a response.
    #[error("transport failed: {0}")]
    TransportError(String),
}

impl ApiError {
    /// The message as the backend phrased it, without our prefixes.
    pub fn message(&self) -> String {
        match self {
            ApiError::Backend { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound => Some(404),
            ApiError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build a `Backend` error from a raw response body.
    pub(crate) fn from_body(status: u16, body: &str) -> Self {
        ApiError::Backend {
            status,
            message: extract_message(body),
        }
    }
}

/// Error bodies differ between services: the row store uses `message`,
/// the auth service uses `msg` or the OAuth pair `error` /
/// `error_description`.
#[derive(Deserialize, Default)]
#[serde(default)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

fn extract_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed
            .msg
            .or(parsed.message)
            .or(parsed.error_description)
            .or(parsed.error)
            .unwrap_or_default(),
        Err(_) => body.trim().to_string(),
    }
}

/// Failures of the todo service, displayed as fixed localized messages.
#[derive(Debug, Error)]
pub enum TodoError {
    #[error("Todoの取得に失敗しました")]
    Fetch(#[source] ApiError),

    #[error("Todoの追加に失敗しました")]
    Add(#[source] ApiError),

    #[error("Todoの更新に失敗しました")]
    Update(#[source] ApiError),

    #[error("Todoの削除に失敗しました")]
    Delete(#[source] ApiError),
}

impl TodoError {
    pub fn api_error(&self) -> &ApiError {
        match self {
            TodoError::Fetch(e) | TodoError::Add(e) | TodoError::Update(e) | TodoError::Delete(e) => e,
        }
    }
}

/// Errors from the realtime websocket.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("channel protocol error: {0}")]
    Protocol(String),

    #[error("channel join rejected: {0}")]
    JoinRejected(String),

    #[error("channel join timed out")]
    JoinTimeout,
}
