//! Minimal built-in dispatcher so the server is usable without an MCP stack
//! plugged in.

use std::time::Instant;

use mcp_ws_protocol::{JsonRpcMessage, Request, Response, RpcError};
use mcp_ws_transport::{MessageHandler, TransportError, TransportHandle};
use serde_json::json;
use tracing::{debug, info, warn};

pub struct BasicDispatcher {
    started: Instant,
}

impl BasicDispatcher {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn handle(&self, request: &Request) -> Response {
        match request.method.as_str() {
            "ping" => Response::success(request.id.clone(), json!({})),
            "server/info" => Response::success(
                request.id.clone(),
                json!({
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptimeMs": self.started.elapsed().as_millis() as u64,
                }),
            ),
            other => Response::error(Some(request.id.clone()), RpcError::method_not_found(other)),
        }
    }
}

impl Default for BasicDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHandler for BasicDispatcher {
    async fn on_message(&self, message: JsonRpcMessage, transport: TransportHandle) {
        let JsonRpcMessage::Request(request) = message else {
            debug!(kind = message.kind(), "ignoring non-request message");
            return;
        };

        let response = self.handle(&request);
        match transport.send(response).await {
            Ok(report) if report.failed > 0 => {
                warn!(request_id = %request.id, "reply could not be delivered");
            }
            Ok(_) => {}
            Err(e) => warn!(request_id = %request.id, "failed to send reply: {e}"),
        }
    }

    fn on_close(&self) {
        info!("no clients connected");
    }

    fn on_error(&self, error: &TransportError) {
        warn!("transport error: {error}");
    }
}
