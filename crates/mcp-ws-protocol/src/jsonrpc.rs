//! JSON-RPC 2.0 base types and the ingress decode step.
//!
//! Every inbound frame goes through [`JsonRpcMessage::decode`] exactly once.
//! Downstream code matches on the resulting variant instead of probing for
//! `id` / `method` fields.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, RpcError};

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request ID: either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// JSON-RPC 2.0 request (carries both `id` and `method`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response (no `method`; exactly one of `result` / `error`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Serialized as `null` when absent (parse errors).
    pub id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(RpcError),
}

/// A decoded frame. The variant is fixed at ingress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper constructors
// ─────────────────────────────────────────────────────────────────────────────

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            payload: ResponsePayload::Result(result),
            id: Some(id),
        }
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            payload: ResponsePayload::Error(error),
            id,
        }
    }

    /// `{"jsonrpc":"2.0","error":{"code":-32700,"message":"Parse error"},"id":null}`
    pub fn parse_error() -> Self {
        Self::error(None, RpcError::parse_error())
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }
}

impl From<Request> for JsonRpcMessage {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Notification> for JsonRpcMessage {
    fn from(n: Notification) -> Self {
        Self::Notification(n)
    }
}

impl From<Response> for JsonRpcMessage {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Superset of every JSON-RPC member; classified into a variant afterwards.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Keeps `"result": null` distinguishable from a missing `result`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcMessage {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        if !value.is_object() {
            let reason = if value.is_array() {
                "Batch requests are not supported"
            } else {
                "Message must be a JSON object"
            };
            return Err(DecodeError::Invalid {
                id: None,
                reason: reason.into(),
            });
        }

        let id_hint = value
            .get("id")
            .cloned()
            .and_then(|v| serde_json::from_value::<RequestId>(v).ok());

        let raw = RawMessage::deserialize(value).map_err(|e| DecodeError::Invalid {
            id: id_hint,
            reason: e.to_string(),
        })?;

        if raw.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(DecodeError::Invalid {
                id: raw.id,
                reason: "Invalid JSON-RPC 2.0 message: jsonrpc must be \"2.0\"".into(),
            });
        }

        match (raw.method, raw.id) {
            (Some(method), id) if method.is_empty() => Err(DecodeError::Invalid {
                id,
                reason: "Method must not be empty".into(),
            }),
            (Some(method), Some(id)) => Ok(Self::Request(Request {
                jsonrpc: JSONRPC_VERSION.into(),
                id,
                method,
                params: raw.params,
            })),
            (Some(method), None) => Ok(Self::Notification(Notification {
                jsonrpc: JSONRPC_VERSION.into(),
                method,
                params: raw.params,
            })),
            (None, id) => {
                let payload = match (raw.error, raw.result) {
                    (Some(error), _) => ResponsePayload::Error(error),
                    (None, Some(result)) => ResponsePayload::Result(result),
                    (None, None) => {
                        return Err(DecodeError::Invalid {
                            id,
                            reason: "Message has neither a method nor a result/error".into(),
                        });
                    }
                };
                Ok(Self::Response(Response {
                    jsonrpc: JSONRPC_VERSION.into(),
                    payload,
                    id,
                }))
            }
        }
    }

    /// Request/response id, if the frame carries one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Notification(_) => None,
            Self::Response(r) => r.id.as_ref(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Notification(_) => "notification",
            Self::Response(_) => "response",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
