//! Object events as carried by `onEvent` notifications.

use remora_core::constants::PARAM_VALUE;
use remora_core::{ObjectRef, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event emitted by a remote object for one subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RomEvent {
    /// Emitting object.
    pub object: ObjectRef,
    /// Subscription the event is delivered for.
    pub subscription: SubscriptionId,
    /// Declared event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Flattened payload.
    #[serde(default)]
    pub data: Value,
}

impl RomEvent {
    /// Encode as `onEvent` params: `{"value": {object, subscription, type, data}}`.
    pub fn to_params(&self) -> Value {
        let mut wrapper = serde_json::Map::new();
        let _ = wrapper.insert(
            PARAM_VALUE.to_owned(),
            serde_json::to_value(self).unwrap_or(Value::Null),
        );
        Value::Object(wrapper)
    }

    /// Decode `onEvent` params, wrapped or bare.
    pub fn from_params(params: &Value) -> Result<Self, serde_json::Error> {
        let body = params.get(PARAM_VALUE).unwrap_or(params);
        Self::deserialize(body)
    }
}
