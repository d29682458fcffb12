//! JSON-RPC error codes and the wire-mapped error type.
//!
//! Every failure that reaches the wire goes through [`RpcError`], which pairs
//! a stable numeric code with a short machine-readable `type` string so
//! callers can branch without parsing messages.

use serde_json::Value;

use crate::ids::{ObjectRef, SessionId};
use crate::wire::ErrorBody;

// ── Numeric codes ───────────────────────────────────────────────────

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Generic application failure.
pub const SERVER_ERROR: i64 = -32000;
/// Referenced object is not registered.
pub const NO_SUCH_OBJECT: i64 = -32001;
/// Session id is no longer known to the server.
pub const SESSION_EXPIRED: i64 = -32002;
/// The transaction was cancelled before it completed.
pub const TRANSACTION_ROLLED_BACK: i64 = -32003;
/// No operation of the class matched the name and arguments.
pub const UNKNOWN_OPERATION: i64 = -32004;
/// Type name not declared in the schema.
pub const UNKNOWN_TYPE: i64 = -32005;

// ── Type strings ────────────────────────────────────────────────────

/// Type strings carried in `error.type`.
pub mod types {
    /// See [`super::PARSE_ERROR`].
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    /// See [`super::INVALID_REQUEST`].
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// See [`super::METHOD_NOT_FOUND`].
    pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
    /// See [`super::INVALID_PARAMS`].
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    /// See [`super::INTERNAL_ERROR`].
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    /// See [`super::SERVER_ERROR`].
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
    /// See [`super::NO_SUCH_OBJECT`].
    pub const NO_SUCH_OBJECT: &str = "NO_SUCH_OBJECT";
    /// See [`super::SESSION_EXPIRED`].
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
    /// See [`super::TRANSACTION_ROLLED_BACK`].
    pub const TRANSACTION_ROLLED_BACK: &str = "TRANSACTION_ROLLED_BACK";
    /// See [`super::UNKNOWN_OPERATION`].
    pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
    /// See [`super::UNKNOWN_TYPE`].
    pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
}

/// Message sent on the wire in place of internal error details.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// RPC error returned by handlers and mapped onto a JSON-RPC error body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// Payload was not valid JSON.
    #[error("parse error: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },

    /// Payload was JSON but not a JSON-RPC 2.0 message.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What is wrong with the envelope.
        message: String,
    },

    /// No handler is registered for the method.
    #[error("method not found: {method}")]
    MethodNotFound {
        /// Requested method name.
        method: String,
    },

    /// Required parameter missing or wrong shape.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Unexpected server failure. The message is logged, never sent.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Object reference is not registered.
    #[error("object not found: {object}")]
    NoSuchObject {
        /// The missing reference.
        object: ObjectRef,
    },

    /// Session id is unknown (closed or timed out).
    #[error("invalid session id {session_id}: session expired")]
    SessionExpired {
        /// The stale id presented by the client.
        session_id: SessionId,
    },

    /// Pending work cancelled because its session went away.
    #[error("transaction rolled back: {reason}")]
    RolledBack {
        /// Why it was cancelled.
        reason: String,
    },

    /// No declared operation matched.
    #[error("class {class} has no operation {operation} matching the given parameters")]
    UnknownOperation {
        /// Class of the target object.
        class: String,
        /// Requested operation.
        operation: String,
    },

    /// Type name not declared.
    #[error("unknown type {type_name}")]
    UnknownType {
        /// Requested type name.
        type_name: String,
    },

    /// Application failure raised by an object implementation.
    #[error("{message}")]
    Application {
        /// Human-readable message.
        message: String,
        /// Structured context (type, method, params).
        data: Option<Value>,
    },
}

impl RpcError {
    /// Numeric JSON-RPC code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse { .. } => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::NoSuchObject { .. } => NO_SUCH_OBJECT,
            Self::SessionExpired { .. } => SESSION_EXPIRED,
            Self::RolledBack { .. } => TRANSACTION_ROLLED_BACK,
            Self::UnknownOperation { .. } => UNKNOWN_OPERATION,
            Self::UnknownType { .. } => UNKNOWN_TYPE,
            Self::Application { .. } => SERVER_ERROR,
        }
    }

    /// Short machine-readable type string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Parse { .. } => types::PARSE_ERROR,
            Self::InvalidRequest { .. } => types::INVALID_REQUEST,
            Self::MethodNotFound { .. } => types::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => types::INVALID_PARAMS,
            Self::Internal { .. } => types::INTERNAL_ERROR,
            Self::NoSuchObject { .. } => types::NO_SUCH_OBJECT,
            Self::SessionExpired { .. } => types::SESSION_EXPIRED,
            Self::RolledBack { .. } => types::TRANSACTION_ROLLED_BACK,
            Self::UnknownOperation { .. } => types::UNKNOWN_OPERATION,
            Self::UnknownType { .. } => types::UNKNOWN_TYPE,
            Self::Application { .. } => types::SERVER_ERROR,
        }
    }

    /// Shorthand for an [`RpcError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Shorthand for an [`RpcError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        let message = match self {
            Self::Internal { .. } => INTERNAL_ERROR_MESSAGE.to_owned(),
            other => other.to_string(),
        };
        let data = match self {
            Self::Application { data, .. } => data.clone(),
            Self::NoSuchObject { object } => Some(serde_json::json!({ "object": object })),
            Self::SessionExpired { session_id } => {
                Some(serde_json::json!({ "sessionId": session_id }))
            }
            _ => None,
        };
        ErrorBody {
            code: self.code(),
            message,
            error_type: Some(self.error_type().to_owned()),
            data,
        }
    }
}

/// Failure decoding a wire message.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Not valid JSON.
    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Valid JSON but not a JSON-RPC 2.0 envelope.
    #[error("invalid JSON-RPC message: {0}")]
    InvalidMessage(String),
}

impl WireError {
    /// Map to the protocol error sent back to the peer.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Parse(e) => RpcError::Parse {
                message: e.to_string(),
            },
            Self::InvalidMessage(m) => RpcError::InvalidRequest { message: m.clone() },
        }
    }
}
