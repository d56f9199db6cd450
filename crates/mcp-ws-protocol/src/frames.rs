//! Transport-level frames that sit beside JSON-RPC: the welcome message and
//! WebSocket close codes.

use serde::{Deserialize, Serialize};

/// WebSocket close codes the server uses when it ends a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: normal closure (idle eviction uses this with "Client timeout").
    Normal,
    /// 1001: server shutting down.
    GoingAway,
    /// 1008: policy violation (authentication failure).
    PolicyViolation,
    /// 1013: try again later (capacity or rate limit).
    TryAgainLater,
}

impl CloseCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::PolicyViolation => 1008,
            Self::TryAgainLater => 1013,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1008 => Some(Self::PolicyViolation),
            1013 => Some(Self::TryAgainLater),
            _ => None,
        }
    }
}

/// Reason strings sent in close frames.
pub struct CloseReason;

impl CloseReason {
    pub const CLIENT_TIMEOUT: &str = "Client timeout";
    pub const SERVER_AT_CAPACITY: &str = "Server at capacity";
    pub const AUTHENTICATION_FAILED: &str = "Authentication failed";
    pub const SHUTTING_DOWN: &str = "Server shutting down";
}

/// First frame sent on every accepted connection, before any RPC traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// RFC 3339 timestamp of the accept.
    pub timestamp: String,
}

impl Welcome {
    pub fn new(client_id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            kind: "welcome".into(),
            client_id: client_id.into(),
            timestamp: timestamp.into(),
        }
    }
}
