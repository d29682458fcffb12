//! Client error types.

use std::time::Duration;

use remora_core::errors::{SESSION_EXPIRED, TRANSACTION_ROLLED_BACK};
use remora_core::{ErrorBody, SessionId};
use serde_json::Value;

/// Error answered by the server for one request.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RemoteError {
    /// Numeric JSON-RPC code.
    pub code: i64,
    /// Machine-readable type, when the server sent one.
    pub error_type: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    pub data: Option<Value>,
}

impl From<ErrorBody> for RemoteError {
    fn from(body: ErrorBody) -> Self {
        Self {
            code: body.code,
            error_type: body.error_type,
            message: body.message,
            data: body.data,
        }
    }
}

/// Failures surfaced by [`crate::JsonRpcClient`] and [`crate::RomClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The socket could not be opened or is gone.
    #[error("connection error: {0}")]
    Connection(String),

    /// No response within the request timeout.
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// Method of the timed-out request.
        method: String,
        /// Configured limit.
        timeout: Duration,
    },

    /// The server answered with an execution error.
    #[error("remote error: {0}")]
    Execution(RemoteError),

    /// The request was cancelled because its session went away.
    #[error("transaction rolled back: {reason}")]
    RolledBack {
        /// Why it was cancelled.
        reason: String,
    },

    /// The server no longer knows the session.
    #[error("session {session_id} expired")]
    SessionExpired {
        /// The expired id.
        session_id: SessionId,
    },

    /// The peer sent something this client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client was closed.
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Map a server error body onto a client error.
    pub fn from_error_body(body: ErrorBody) -> Self {
        match body.code {
            TRANSACTION_ROLLED_BACK => Self::RolledBack {
                reason: body.message,
            },
            SESSION_EXPIRED => match body
                .data
                .as_ref()
                .and_then(|d| d.get("sessionId"))
                .and_then(Value::as_str)
            {
                Some(id) => Self::SessionExpired {
                    session_id: SessionId::from(id),
                },
                None => Self::Execution(body.into()),
            },
            _ => Self::Execution(body.into()),
        }
    }

    /// Execution error details, if this is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Execution(e) => Some(e),
            _ => None,
        }
    }

    /// Whether retrying after a reconnection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}
