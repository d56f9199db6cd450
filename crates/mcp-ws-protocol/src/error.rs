//! JSON-RPC 2.0 error object, error codes, and ingress decode errors.

use serde::{Deserialize, Serialize};

use crate::jsonrpc::RequestId;

/// Standard JSON-RPC 2.0 error codes plus transport-level server errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // JSON-RPC 2.0 standard errors
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,

    // Server errors raised by the transport itself
    ServerError,
    RateLimited,
    RequestTooLarge,

    Custom(i32),
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError => -32000,
            Self::RateLimited => -32001,
            Self::RequestTooLarge => -32002,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::ServerError,
            -32001 => Self::RateLimited,
            -32002 => Self::RequestTooLarge,
            c => Self::Custom(c),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The fixed `-32700` object sent back for undecodable frames.
    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn rate_limited(reason: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::new(ErrorCode::RateLimited, reason)
            .with_data(serde_json::json!({ "retryAfter": retry_after_secs }))
    }

    pub fn request_too_large(size: usize, limit: usize) -> Self {
        Self::new(
            ErrorCode::RequestTooLarge,
            format!("Request too large: {size} bytes exceeds limit of {limit}"),
        )
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Why an inbound frame could not be turned into a [`crate::JsonRpcMessage`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not JSON at all.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The frame is JSON but not a JSON-RPC 2.0 message.
    #[error("invalid request: {reason}")]
    Invalid {
        /// Request id, when one could be recovered from the frame.
        id: Option<RequestId>,
        reason: String,
    },
}

impl DecodeError {
    /// The error object a server answers this frame with.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Parse(_) => RpcError::parse_error(),
            Self::Invalid { reason, .. } => RpcError::invalid_request(reason.clone()),
        }
    }

    /// The id the error reply should carry (`null` for parse errors).
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Parse(_) => None,
            Self::Invalid { id, .. } => id.clone(),
        }
    }
}
