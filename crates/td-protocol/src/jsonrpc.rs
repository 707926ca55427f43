//! JSON-RPC 2.0 envelopes
//!
//! Three mutually exclusive frame shapes share the fixed `jsonrpc: "2.0"` tag:
//! requests (`id` + `method`), responses (`id`, no `method`) and
//! notifications (`method`, no `id`). Parameter and result bytes are kept raw
//! (`serde_json::value::RawValue`) and decoded by the handler that knows the
//! concrete shape.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use td_types::{McpError, Result};

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Request identifier: a string or integer scalar chosen by the sender.
///
/// `Value::Null` never identifies a valid request; an absent id marks the
/// frame as a notification.
pub type RequestId = Value;

/// Normalize a request id for pending-map lookup.
///
/// String ids are quoted so that the string `"1"` and the number `1` cannot
/// collide under the same key.
pub fn request_id_key(id: &RequestId) -> String {
    match id {
        Value::Null => "__null_id__".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

/// Deserializer that keeps `null` distinguishable from an absent field.
///
/// With a plain `Option<Value>`, `"id": null` and a missing `id` both decode
/// to `None`; frame classification needs to tell them apart.
fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Value::deserialize(deserializer)?))
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,

    /// Request identifier; `Value::Null` fails validation.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub id: Option<RequestId>,

    pub method: String,

    /// Raw parameter bytes, decoded on demand via [`JsonRpcRequest::params_as`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

impl JsonRpcRequest {
    pub fn new<P: Serialize>(id: RequestId, method: &str, params: &P) -> Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params: Some(serde_json::value::to_raw_value(params)?),
        })
    }

    /// Validity per JSON-RPC 2.0: version tag matches, method non-empty,
    /// id present and non-null.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
            && !self.method.is_empty()
            && matches!(self.id, Some(ref id) if !id.is_null())
    }

    /// Decode the raw parameter bytes into a handler-specific shape. Absent
    /// (or null) params decode as an empty object, matching methods whose
    /// parameter shapes are all-optional.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(raw_or_empty(self.params.as_deref())).map_err(McpError::Serialization)
    }
}

fn raw_or_empty(raw: Option<&RawValue>) -> &str {
    match raw.map(RawValue::get) {
        Some(raw) if raw != "null" => raw,
        _ => "{}",
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response: `result` XOR `error`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    pub id: RequestId,

    /// Raw result bytes, decoded on demand via [`JsonRpcResponse::result_as`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success<R: Serialize>(id: RequestId, result: &R) -> Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(serde_json::value::to_raw_value(result)?),
            error: None,
        })
    }

    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Decode the raw result bytes into a caller-specific shape. An absent
    /// result decodes as an empty object.
    pub fn result_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(raw_or_empty(self.result.as_deref())).map_err(McpError::Serialization)
    }
}

/// JSON-RPC 2.0 notification: a request without an id, never answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

impl JsonRpcNotification {
    pub fn new<P: Serialize>(method: &str, params: &P) -> Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: Some(serde_json::value::to_raw_value(params)?),
        })
    }

    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(raw_or_empty(self.params.as_deref())).map_err(McpError::Serialization)
    }
}

/// Frame classification result, see [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    Notification,
}

#[derive(Deserialize)]
struct FrameProbe {
    #[serde(default, deserialize_with = "deserialize_present")]
    id: Option<Value>,
    method: Option<String>,
}

/// Classify an inbound frame without fully decoding it.
///
/// No `id` field ⇒ notification; `id` but no `method` ⇒ response; both ⇒
/// request. The full decode into the concrete envelope happens afterwards.
pub fn classify(msg: &[u8]) -> Result<FrameKind> {
    let probe: FrameProbe = serde_json::from_slice(msg)?;
    match (probe.id.is_some(), probe.method.is_some()) {
        (false, _) => Ok(FrameKind::Notification),
        (true, false) => Ok(FrameKind::Response),
        (true, true) => Ok(FrameKind::Request),
    }
}
