//! Per-socket tasks.
//!
//! Each accepted socket gets three tasks:
//! - writer: drains the connection's outbound queue into the socket
//! - reader: size check, decode, admission through the hub, then hand-off
//! - dispatcher: feeds decoded messages to the handler in arrival order
//!
//! The reader ends when the writer does (close frame sent, kill switch, or
//! socket error), and tells the hub on the way out.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mcp_ws_protocol::{JsonRpcMessage, RequestId, Response, RpcError};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::admission::RequestContext;
use crate::error::TransportError;
use crate::hub::{HubCommand, TransportHandle};
use crate::registry::{ConnectionId, ConnectionSink, Outbound, OutboundQueue};
use crate::server::MessageHandler;

/// Bytes read past `max_request_size` so an oversized frame can still be
/// answered with an error instead of a dropped socket.
const OVERSIZE_HEADROOM: usize = 1024 * 1024;

pub(crate) struct SocketLimits {
    pub max_request_size: usize,
    pub outbound_buffer: usize,
}

impl SocketLimits {
    /// Frame and message ceiling handed to the socket layer.
    pub(crate) fn read_ceiling(&self) -> usize {
        self.max_request_size
            .saturating_add(OVERSIZE_HEADROOM)
            .max(self.max_request_size.saturating_mul(2))
    }
}

pub(crate) async fn serve_socket<H: MessageHandler>(
    socket: WebSocket,
    context: RequestContext,
    transport: TransportHandle,
    handler: Arc<H>,
    limits: SocketLimits,
) {
    let (ws_tx, ws_rx) = socket.split();
    let (sink, queue) = ConnectionSink::channel(limits.outbound_buffer);
    let mut writer = tokio::spawn(write_loop(ws_tx, queue));

    let client_id = context.client_id.clone();
    let connect = transport
        .request(|reply| HubCommand::Connect {
            context,
            sink: sink.clone(),
            reply,
        })
        .await;
    let id = match connect {
        Ok(Ok(id)) => id,
        Ok(Err(err)) => {
            // The hub has already queued the matching close frame.
            debug!(client_id = %client_id, error = %err, "socket not admitted");
            if err.close_code().is_none() {
                sink.terminate();
            }
            let _ = writer.await;
            return;
        }
        Err(_) => {
            sink.terminate();
            let _ = writer.await;
            return;
        }
    };

    let (inbox, dispatch_rx) = mpsc::channel(limits.outbound_buffer.max(1));
    tokio::spawn(dispatch_loop(handler.clone(), transport.clone(), dispatch_rx));

    let session = Session {
        id: id.clone(),
        sink,
        transport: transport.clone(),
        handler,
        inbox,
        max_request_size: limits.max_request_size,
    };
    session.read_loop(ws_rx, &mut writer).await;

    transport.notify(HubCommand::Disconnected { id }).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut queue: OutboundQueue) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = queue.kill.notified() => break,
            frame = queue.frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code: code.code(),
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if let Err(e) = ws_tx.send(message).await {
            debug!("socket write failed: {e}");
            break;
        }
        if last {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

async fn dispatch_loop<H: MessageHandler>(
    handler: Arc<H>,
    transport: TransportHandle,
    mut inbox: mpsc::Receiver<JsonRpcMessage>,
) {
    while let Some(message) = inbox.recv().await {
        handler.on_message(message, transport.clone()).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader
// ─────────────────────────────────────────────────────────────────────────────

struct Session<H: MessageHandler> {
    id: ConnectionId,
    /// Used for error replies that never go through the dispatcher.
    sink: ConnectionSink,
    transport: TransportHandle,
    handler: Arc<H>,
    inbox: mpsc::Sender<JsonRpcMessage>,
    max_request_size: usize,
}

impl<H: MessageHandler> Session<H> {
    async fn read_loop(
        &self,
        mut ws_rx: SplitStream<WebSocket>,
        writer: &mut tokio::task::JoinHandle<()>,
    ) {
        loop {
            tokio::select! {
                frame = ws_rx.next() => {
                    let flow = match frame {
                        Some(Ok(Message::Text(text))) => self.on_text(text.as_str()).await,
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => self.on_text(text).await,
                            Err(_) => {
                                debug!(conn_id = %self.id, "binary frame is not UTF-8");
                                self.transport.notify(HubCommand::Touch { id: self.id.clone() }).await;
                                self.reply(Response::parse_error());
                                ControlFlow::Continue(())
                            }
                        },
                        Some(Ok(Message::Pong(_))) => {
                            self.transport.notify(HubCommand::Pong { id: self.id.clone() }).await;
                            ControlFlow::Continue(())
                        }
                        // The socket answers pings on its own.
                        Some(Ok(Message::Ping(_))) => ControlFlow::Continue(()),
                        Some(Ok(Message::Close(frame))) => {
                            debug!(
                                conn_id = %self.id,
                                code = frame.as_ref().map(|f| f.code),
                                "client sent close"
                            );
                            ControlFlow::Break(())
                        }
                        Some(Err(e)) => {
                            let err = TransportError::WebSocket(e);
                            error!(conn_id = %self.id, error = %err, "socket error");
                            self.handler.on_error(&err);
                            ControlFlow::Break(())
                        }
                        None => ControlFlow::Break(()),
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                _ = &mut *writer => {
                    debug!(conn_id = %self.id, "writer finished");
                    break;
                }
            }
        }
    }

    async fn on_text(&self, text: &str) -> ControlFlow<()> {
        if text.len() > self.max_request_size {
            let err = TransportError::RequestTooLarge {
                size: text.len(),
                limit: self.max_request_size,
            };
            warn!(conn_id = %self.id, error = %err, "frame rejected");
            self.transport.notify(HubCommand::Touch { id: self.id.clone() }).await;
            self.reply(Response::error(
                None,
                RpcError::request_too_large(text.len(), self.max_request_size),
            ));
            return ControlFlow::Continue(());
        }

        let message = match JsonRpcMessage::decode(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(conn_id = %self.id, error = %err, "undecodable frame");
                self.transport.notify(HubCommand::Touch { id: self.id.clone() }).await;
                self.reply(Response::error(err.request_id(), err.to_rpc_error()));
                return ControlFlow::Continue(());
            }
        };

        if message.method().is_none() {
            self.transport.notify(HubCommand::Touch { id: self.id.clone() }).await;
            return self.dispatch(message).await;
        }

        let request_id = if message.is_request() {
            message.id().cloned()
        } else {
            None
        };
        let admitted = self
            .transport
            .request(|reply| HubCommand::Admit {
                id: self.id.clone(),
                request_id: request_id.clone(),
                reply,
            })
            .await;

        match admitted {
            Ok(Ok(())) => {
                debug!(
                    conn_id = %self.id,
                    kind = message.kind(),
                    method = message.method().unwrap_or_default(),
                    "frame received"
                );
                self.dispatch(message).await
            }
            Ok(Err(TransportError::RateLimited {
                reason,
                retry_after_secs,
                ..
            })) => {
                match request_id {
                    Some(id) => self.reject(id, RpcError::rate_limited(reason, retry_after_secs)),
                    None => debug!(conn_id = %self.id, "rate-limited notification dropped"),
                }
                ControlFlow::Continue(())
            }
            // Closed: the hub no longer knows this connection.
            Ok(Err(_)) | Err(_) => ControlFlow::Break(()),
        }
    }

    async fn dispatch(&self, message: JsonRpcMessage) -> ControlFlow<()> {
        match self.inbox.send(message).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }

    fn reject(&self, id: RequestId, error: RpcError) {
        self.reply(Response::error(Some(id), error));
    }

    fn reply(&self, response: Response) {
        let frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn_id = %self.id, "failed to encode error reply: {e}");
                return;
            }
        };
        if let Err(reason) = self.sink.try_send(Outbound::Text(frame.into())) {
            warn!(conn_id = %self.id, reason, "error reply dropped");
        }
    }
}
