//! Built-in RPC method handlers.

pub mod rom;
pub mod session;

use remora_core::RpcError;
use remora_core::constants::{
    METHOD_CREATE, METHOD_INVOKE, METHOD_KEEPALIVE, METHOD_RELEASE, METHOD_SUBSCRIBE,
    METHOD_UNSUBSCRIBE,
};
use serde_json::Value;

use crate::rpc::registry::MethodRegistry;

/// Register every built-in handler.
pub fn register_all(registry: &mut MethodRegistry) {
    registry.register(METHOD_CREATE, rom::CreateHandler);
    registry.register(METHOD_INVOKE, rom::InvokeHandler);
    registry.register(METHOD_RELEASE, rom::ReleaseHandler);
    registry.register(METHOD_SUBSCRIBE, rom::SubscribeHandler);
    registry.register(METHOD_UNSUBSCRIBE, rom::UnsubscribeHandler);
    registry.register(METHOD_KEEPALIVE, session::KeepAliveHandler);
}

/// Extract a required string parameter.
pub fn require_string_param(params: &Value, key: &str) -> Result<String, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RpcError::invalid_params(format!("Missing required parameter '{key}'")))
}

/// Extract an optional parameter, treating `null` as absent.
pub fn opt_param(params: &Value, key: &str) -> Value {
    params.get(key).cloned().unwrap_or(Value::Null)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_all_covers_object_methods() {
        let mut reg = MethodRegistry::new();
        register_all(&mut reg);
        for m in ["create", "invoke", "release", "subscribe", "unsubscribe", "keepAlive"] {
            assert!(reg.has_method(m), "{m} missing");
        }
    }

    #[test]
    fn require_string_param_reports_key() {
        let err = require_string_param(&json!({"type": 3}), "type").unwrap_err();
        assert!(err.to_string().contains("'type'"));
        assert_eq!(require_string_param(&json!({"type": "Pipeline"}), "type").unwrap(), "Pipeline");
        assert_eq!(opt_param(&json!({}), "x"), Value::Null);
    }
}
