//! Object model errors.

use remora_core::errors::RpcError;
use remora_core::{ObjectRef, SubscriptionId};
use serde_json::Value;

/// Failure converting between wire JSON and [`crate::RomValue`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlattenError {
    /// The JSON value cannot represent the target type.
    #[error("value {value} is not assignable to {target}")]
    ShapeMismatch {
        /// Compact rendering of the offending value.
        value: String,
        /// Expected type.
        target: String,
    },

    /// A string is not a variant of the target enum.
    #[error("{variant} is not a variant of enum {enum_name}")]
    UnknownVariant {
        /// Target enum.
        enum_name: String,
        /// Offending variant.
        variant: String,
    },

    /// A required record field is absent.
    #[error("record {record} is missing field {field}")]
    MissingField {
        /// Target record.
        record: String,
        /// Absent field.
        field: String,
    },

    /// An object reference did not resolve.
    #[error("object not found: {object}")]
    NoSuchObject {
        /// Unresolved reference.
        object: ObjectRef,
    },

    /// A resolved object is not of the expected class.
    #[error("object {object} of class {actual} is not a {expected}")]
    ClassMismatch {
        /// The reference.
        object: ObjectRef,
        /// Expected class.
        expected: String,
        /// Class of the registered object.
        actual: String,
    },

    /// The target type names something undeclared.
    #[error("undeclared type {name}")]
    UnknownType {
        /// Undeclared name.
        name: String,
    },

    /// NaN or an infinity, which has no JSON form.
    #[error("float {value} has no JSON representation")]
    NonFinite {
        /// Offending value.
        value: f64,
    },
}

impl FlattenError {
    pub(crate) fn mismatch(value: &Value, target: impl ToString) -> Self {
        const MAX: usize = 120;
        let mut rendered = value.to_string();
        if rendered.len() > MAX {
            let cut = (0..=MAX).rev().find(|i| rendered.is_char_boundary(*i)).unwrap_or(0);
            rendered.truncate(cut);
            rendered.push('…');
        }
        Self::ShapeMismatch {
            value: rendered,
            target: target.to_string(),
        }
    }
}

/// Errors raised by the object model and by object implementations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RomError {
    /// Reference not registered (never created, or released).
    #[error("object not found: {object}")]
    NoSuchObject {
        /// The reference.
        object: ObjectRef,
    },

    /// Type name not declared.
    #[error("unknown type {type_name}")]
    UnknownType {
        /// Requested type.
        type_name: String,
    },

    /// Declared type without a constructor.
    #[error("type {type_name} cannot be instantiated")]
    NotInstantiable {
        /// Requested type.
        type_name: String,
    },

    /// No declared operation matched name and arguments.
    #[error("class {class} has no operation {operation} matching the given parameters")]
    UnknownOperation {
        /// Class of the target.
        class: String,
        /// Requested operation.
        operation: String,
    },

    /// Event type not declared by the class or its ancestors.
    #[error("class {class} does not emit {event_type}")]
    UnknownEvent {
        /// Class of the target.
        class: String,
        /// Requested event type.
        event_type: String,
    },

    /// Subscription id not registered for the object.
    #[error("subscription {subscription} not found")]
    NoSuchSubscription {
        /// The subscription.
        subscription: SubscriptionId,
    },

    /// Parameters malformed before type-directed decoding.
    #[error("{message}")]
    InvalidParams {
        /// What is wrong.
        message: String,
    },

    /// Type-directed decoding failed.
    #[error(transparent)]
    Flatten(#[from] FlattenError),

    /// Inconsistent declarations detected at build time.
    #[error("schema error: {message}")]
    Schema {
        /// What is inconsistent.
        message: String,
    },

    /// Failure reported by an object implementation.
    #[error("{message}")]
    Application {
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        data: Option<Value>,
    },

    /// Unexpected failure inside the object model.
    #[error("{message}")]
    Internal {
        /// Description (logged, not sent).
        message: String,
    },
}

impl RomError {
    /// Shorthand for an implementation-level failure.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            data: None,
        }
    }

    /// Shorthand for a parameter failure.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }
}

/// A [`RomError`] wrapped with the request context that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{action} failed: {source}")]
pub struct DispatchError {
    /// `create <Type>`, `invoke <Class>.<op>`, …
    pub action: String,
    /// Class or type involved.
    pub type_name: Option<String>,
    /// Operation involved.
    pub operation: Option<String>,
    /// Target object.
    pub object: Option<ObjectRef>,
    /// Parameters as received.
    pub params: Value,
    /// Underlying failure.
    pub source: RomError,
}

impl DispatchError {
    /// Context as a JSON object.
    pub fn context(&self) -> Value {
        let mut ctx = serde_json::Map::new();
        if let Some(t) = &self.type_name {
            let _ = ctx.insert("type".into(), Value::String(t.clone()));
        }
        if let Some(op) = &self.operation {
            let _ = ctx.insert("method".into(), Value::String(op.clone()));
        }
        if let Some(obj) = &self.object {
            let _ = ctx.insert("object".into(), Value::String(obj.to_string()));
        }
        if !self.params.is_null() {
            let _ = ctx.insert("params".into(), self.params.clone());
        }
        Value::Object(ctx)
    }

    /// Map to the error sent on the wire.
    pub fn to_rpc_error(&self) -> RpcError {
        match &self.source {
            RomError::NoSuchObject { object }
            | RomError::Flatten(FlattenError::NoSuchObject { object }) => RpcError::NoSuchObject {
                object: object.clone(),
            },
            RomError::UnknownType { type_name } => RpcError::UnknownType {
                type_name: type_name.clone(),
            },
            RomError::UnknownOperation { class, operation } => RpcError::UnknownOperation {
                class: class.clone(),
                operation: operation.clone(),
            },
            RomError::NotInstantiable { .. }
            | RomError::UnknownEvent { .. }
            | RomError::NoSuchSubscription { .. }
            | RomError::InvalidParams { .. }
            | RomError::Flatten(_) => RpcError::InvalidParams {
                message: self.to_string(),
            },
            RomError::Application { message, data } => {
                let mut context = self.context();
                if let (Some(data), Value::Object(ctx)) = (data, &mut context) {
                    let _ = ctx.insert("data".into(), data.clone());
                }
                RpcError::Application {
                    message: format!("{}: {message}", self.action),
                    data: Some(context),
                }
            }
            RomError::Schema { .. } | RomError::Internal { .. } => RpcError::Internal {
                message: self.to_string(),
            },
        }
    }
}

impl From<DispatchError> for RpcError {
    fn from(e: DispatchError) -> Self {
        e.to_rpc_error()
    }
}
