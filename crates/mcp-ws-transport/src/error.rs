//! Transport error taxonomy.
//!
//! Admission variants are returned as values, never raised: the transport turns
//! each one into a close code or a JSON-RPC error frame and keeps serving the
//! other connections.

use std::net::SocketAddr;

use mcp_ws_protocol::{CloseCode, CloseReason, DecodeError};

use crate::admission::RateLimitScope;
use crate::registry::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("server at capacity ({max} connections)")]
    CapacityExceeded { max: usize },

    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("{reason}")]
    RateLimited {
        scope: RateLimitScope,
        reason: String,
        retry_after_secs: u64,
    },

    #[error("request too large: {size} bytes exceeds limit of {limit}")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("method not allowed: {method}")]
    MethodNotAllowed { method: String },

    #[error(transparent)]
    ParseError(#[from] DecodeError),

    #[error("connection {connection_id} idle for {idle_ms} ms")]
    ConnectionTimeout {
        connection_id: ConnectionId,
        idle_ms: u64,
    },

    #[error("delivery to {connection_id} failed: {reason}")]
    DeliveryFailure {
        connection_id: ConnectionId,
        reason: &'static str,
    },

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("invalid listen address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// WebSocket close code for errors that end a connection.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::CapacityExceeded { .. } | Self::RateLimited { .. } => {
                Some(CloseCode::TryAgainLater)
            }
            Self::AuthenticationFailure => Some(CloseCode::PolicyViolation),
            Self::ConnectionTimeout { .. } => Some(CloseCode::Normal),
            _ => None,
        }
    }

    /// Close-frame reason paired with [`Self::close_code`].
    pub fn close_reason(&self) -> String {
        match self {
            Self::CapacityExceeded { .. } => CloseReason::SERVER_AT_CAPACITY.into(),
            Self::AuthenticationFailure => CloseReason::AUTHENTICATION_FAILED.into(),
            Self::ConnectionTimeout { .. } => CloseReason::CLIENT_TIMEOUT.into(),
            other => other.to_string(),
        }
    }
}
