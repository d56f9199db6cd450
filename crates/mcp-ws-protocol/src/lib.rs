//! MCP WebSocket transport - protocol types
//!
//! JSON-RPC 2.0 frames as they travel over the socket. This crate owns the
//! closed request/response/notification decode step, the error object and
//! its codes, and the handful of transport-level frames (welcome, close codes)
//! that are not part of JSON-RPC itself.

pub mod error;
pub mod frames;
pub mod jsonrpc;

pub use error::{DecodeError, ErrorCode, RpcError};
pub use frames::{CloseCode, CloseReason, Welcome};
pub use jsonrpc::{
    JsonRpcMessage, Notification, Request, RequestId, Response, ResponsePayload,
};
