//! JSON-RPC 2.0 wire codec.
//!
//! A [`Message`] is either a [`Request`] (a notification when `id` is absent)
//! or a [`Response`] carrying exactly one of `result` / `error`. A void
//! response serializes `"result": null`, which is distinct from an absent
//! `result`, so the codec keeps the two apart on decode.
//!
//! Session affinity lives in the `sessionId` key of request params and
//! response results; non-object payloads are wrapped as `{"value": …}` to make
//! room for it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::constants::{JSONRPC_VERSION, PARAM_SESSION_ID, PARAM_VALUE};
use crate::errors::WireError;
use crate::ids::SessionId;

/// Request identifier, unique per session.
pub type RequestId = u64;

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// Present-but-null deserializes to `Some(Value::Null)`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC request or notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Keyed parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Build a request expecting a response.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// Build a notification (no id, never answered).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Whether this is a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Session id carried in the params, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.params.as_ref().and_then(session_id_of)
    }

    /// Set the `sessionId` param, wrapping non-object params.
    pub fn set_session_id(&mut self, session_id: &SessionId) {
        let params = self.params.take().unwrap_or(Value::Null);
        self.params = Some(with_session_id(params, session_id));
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }
}

/// Structured error inside a [`Response`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Numeric JSON-RPC code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Short machine-readable type (e.g. `NO_SUCH_OBJECT`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(
        code: i64,
        error_type: Option<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            error_type,
            data,
        }
    }
}

/// JSON-RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Echoed request id; `null` when the request could not be parsed.
    pub id: Option<RequestId>,
    /// Success payload. `Some(Null)` for a void response.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Build a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build a void success response (`"result": null`).
    pub fn void(id: RequestId) -> Self {
        Self::success(id, Value::Null)
    }

    /// Build an error response.
    pub fn error(id: Option<RequestId>, error: ErrorBody) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Whether the response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Session id carried in the result, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.result.as_ref().and_then(session_id_of)
    }

    /// Set the `sessionId` key of the result, wrapping non-object results.
    pub fn set_session_id(&mut self, session_id: &SessionId) {
        if let Some(result) = self.result.take() {
            self.result = Some(with_session_id(result, session_id));
        }
    }

    /// Split into the result or the error.
    pub fn into_result(self) -> Result<Value, ErrorBody> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Any inbound or outbound JSON-RPC message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Request or notification.
    Request(Request),
    /// Response to an earlier request.
    Response(Response),
}

impl Message {
    /// Decode a text frame. Batches are not supported.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, WireError> {
        let Value::Object(ref obj) = value else {
            return Err(WireError::InvalidMessage("expected a JSON object".into()));
        };
        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(WireError::InvalidMessage(format!(
                    "unsupported jsonrpc version {other}"
                )));
            }
            None => return Err(WireError::InvalidMessage("missing jsonrpc field".into())),
        }
        if obj.contains_key("method") {
            let request: Request = serde_json::from_value(value)
                .map_err(|e| WireError::InvalidMessage(e.to_string()))?;
            Ok(Self::Request(request))
        } else if obj.contains_key("result") || obj.contains_key("error") {
            let response: Response = serde_json::from_value(value)
                .map_err(|e| WireError::InvalidMessage(e.to_string()))?;
            if response.result.is_some() && response.error.is_some() {
                return Err(WireError::InvalidMessage(
                    "response carries both result and error".into(),
                ));
            }
            Ok(Self::Response(response))
        } else {
            Err(WireError::InvalidMessage(
                "neither a request nor a response".into(),
            ))
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_text(&self) -> String {
        // Envelopes contain only strings, integers and JSON values.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

// ── Session id helpers ──────────────────────────────────────────────

/// Read `sessionId` from a params or result payload.
pub fn session_id_of(value: &Value) -> Option<SessionId> {
    value
        .get(PARAM_SESSION_ID)
        .and_then(Value::as_str)
        .map(SessionId::from)
}

/// Add `sessionId` to a payload. Objects gain the key; `null` becomes
/// `{"sessionId": …}`; anything else becomes `{"value": …, "sessionId": …}`.
pub fn with_session_id(value: Value, session_id: &SessionId) -> Value {
    let mut obj = match value {
        Value::Object(obj) => obj,
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            let _ = m.insert(PARAM_VALUE.to_owned(), other);
            m
        }
    };
    let _ = obj.insert(
        PARAM_SESSION_ID.to_owned(),
        Value::String(session_id.as_str().to_owned()),
    );
    Value::Object(obj)
}

/// Remove `sessionId` from a payload. An object left empty becomes `null`.
pub fn without_session_id(value: Value) -> Value {
    match value {
        Value::Object(mut obj) => {
            if obj.remove(PARAM_SESSION_ID).is_some() && obj.is_empty() {
                Value::Null
            } else {
                Value::Object(obj)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn request_serializes_without_absent_fields() {
        let req = Request::notification("onEvent", None);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "method": "onEvent"}));
    }

    #[test]
    fn void_response_serializes_null_result() {
        let text = Message::from(Response::void(3)).to_text();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "id": 3, "result": null}));
    }

    #[test]
    fn void_response_decodes_as_present_null() {
        let msg = Message::parse(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        let resp = assert_matches!(msg, Message::Response(r) => r);
        assert_eq!(resp.result, Some(Value::Null));
        assert!(!resp.is_error());
    }

    #[test]
    fn error_response_decodes_type() {
        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32001,"type":"NO_SUCH_OBJECT","message":"gone"}}"#;
        let resp = assert_matches!(Message::parse(text).unwrap(), Message::Response(r) => r);
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32001);
        assert_eq!(err.error_type.as_deref(), Some("NO_SUCH_OBJECT"));
    }

    #[test]
    fn parse_request_and_notification() {
        let req = assert_matches!(
            Message::parse(r#"{"jsonrpc":"2.0","method":"ping","id":7}"#).unwrap(),
            Message::Request(r) => r
        );
        assert_eq!(req.id, Some(7));
        assert!(!req.is_notification());

        let note = assert_matches!(
            Message::parse(r#"{"jsonrpc":"2.0","method":"onEvent","params":{}}"#).unwrap(),
            Message::Request(r) => r
        );
        assert!(note.is_notification());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert_matches!(Message::parse("{not json"), Err(WireError::Parse(_)));
    }

    #[test]
    fn envelope_violations_are_invalid() {
        assert_matches!(
            Message::parse(r#"[{"jsonrpc":"2.0","method":"a"}]"#),
            Err(WireError::InvalidMessage(_))
        );
        assert_matches!(
            Message::parse(r#"{"jsonrpc":"1.0","method":"a"}"#),
            Err(WireError::InvalidMessage(_))
        );
        assert_matches!(
            Message::parse(r#"{"jsonrpc":"2.0","id":1}"#),
            Err(WireError::InvalidMessage(_))
        );
        assert_matches!(
            Message::parse(r#"{"jsonrpc":"2.0","method":5}"#),
            Err(WireError::InvalidMessage(_))
        );
        assert_matches!(
            Message::parse(r#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":1,"message":"x"}}"#),
            Err(WireError::InvalidMessage(_))
        );
    }

    #[test]
    fn session_id_injected_into_object_params() {
        let mut req = Request::new(1, "create", Some(json!({"type": "Pipeline"})));
        req.set_session_id(&SessionId::from("s1"));
        assert_eq!(
            req.params,
            Some(json!({"type": "Pipeline", "sessionId": "s1"}))
        );
        assert_eq!(req.session_id(), Some(SessionId::from("s1")));
    }

    #[test]
    fn session_id_wraps_scalar_result() {
        let mut resp = Response::success(1, json!("abc_Pipeline"));
        resp.set_session_id(&SessionId::from("s1"));
        assert_eq!(
            resp.result,
            Some(json!({"value": "abc_Pipeline", "sessionId": "s1"}))
        );
    }

    #[test]
    fn session_id_not_added_to_error_response() {
        let mut resp = Response::error(Some(1), ErrorBody::new(-32000, None, "x", None));
        resp.set_session_id(&SessionId::from("s1"));
        assert!(resp.result.is_none());
    }

    #[test]
    fn strip_session_id() {
        let stripped = without_session_id(json!({"sessionId": "s1"}));
        assert_eq!(stripped, Value::Null);
        let stripped = without_session_id(json!({"value": 3, "sessionId": "s1"}));
        assert_eq!(stripped, json!({"value": 3}));
        assert_eq!(without_session_id(json!({})), json!({}));
    }
}
