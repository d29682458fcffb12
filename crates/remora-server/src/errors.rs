//! Server-side error types.
//!
//! [`SessionError`] covers connectivity: it is returned to code that pushes
//! messages through a session and is retryable once a transport is bound
//! again. [`TransactionError`] covers contract violations by handler code and
//! never reaches the wire.

use std::time::Duration;

use remora_core::{ErrorBody, RequestId, SessionId};

/// Failure sending through a session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// No transport is bound and the session is not polling.
    #[error("session {session_id} has no transport bound")]
    Disconnected {
        /// Affected session.
        session_id: SessionId,
    },

    /// The bound transport refused the message (closed or full).
    #[error("transport rejected message for session {session_id}")]
    SendFailed {
        /// Affected session.
        session_id: SessionId,
    },

    /// The session has been closed.
    #[error("session {session_id} is closed")]
    Closed {
        /// Affected session.
        session_id: SessionId,
    },

    /// The client did not answer a server request in time.
    #[error("no response to {method} within {timeout:?}")]
    Timeout {
        /// Request method.
        method: String,
        /// Time waited.
        timeout: Duration,
    },

    /// The client answered a server request with an error.
    #[error("client error {}: {}", .0.code, .0.message)]
    Remote(ErrorBody),
}

impl SessionError {
    /// Whether retrying after a reconnection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::SendFailed { .. })
    }
}

/// Handler misuse of a [`Transaction`](crate::transaction::Transaction).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    /// A response was already sent.
    #[error("response already sent for {method} (id {request_id:?})")]
    AlreadyResponded {
        /// Request method.
        method: String,
        /// Request id.
        request_id: Option<RequestId>,
    },

    /// Notifications are never answered.
    #[error("cannot respond to notification {method}")]
    Notification {
        /// Notification method.
        method: String,
    },

    /// Nobody is waiting for the response anymore.
    #[error("response channel for request {request_id} is closed")]
    Disconnected {
        /// Request id.
        request_id: RequestId,
    },
}
