//! WebSocket transport server using Axum.
//!
//! Serves the WebSocket endpoint plus `/health`, applies HTTP-level admission
//! (method, declared body size, CORS) as middleware, and owns the hub task
//! for the lifetime of the listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Request, State, WebSocketUpgrade},
    http::{HeaderMap, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use mcp_ws_protocol::JsonRpcMessage;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::admission::{SecurityConfig, create_request_context, cors, validation};
use crate::clock::{Clock, TokioClock};
use crate::config::TransportConfig;
use crate::connection::{SocketLimits, serve_socket};
use crate::error::TransportError;
use crate::hub::{DeliveryReport, Hub, HubCommand, TransportHandle, TransportSnapshot};

/// Depth of the hub's command queue.
const HUB_QUEUE: usize = 1024;

/// How long `close()` waits for the HTTP listener to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Implemented by the RPC dispatcher sitting on top of the transport.
///
/// `on_message` is called once per decoded inbound message, in arrival order
/// per connection. Replies go back through the supplied [`TransportHandle`].
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(
        &self,
        message: JsonRpcMessage,
        transport: TransportHandle,
    ) -> impl Future<Output = ()> + Send;

    /// The last connection went away, or the transport was closed.
    fn on_close(&self) {}

    /// Unexpected socket-level failure. The affected connection is dropped;
    /// the transport keeps serving the rest.
    fn on_error(&self, _error: &TransportError) {}
}

struct AppState<H: MessageHandler> {
    transport: TransportHandle,
    handler: Arc<H>,
    security: Arc<SecurityConfig>,
    outbound_buffer: usize,
}

/// A running transport: HTTP listener plus hub task.
pub struct Transport {
    handle: TransportHandle,
    local_addr: SocketAddr,
    path: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    hub: Option<JoinHandle<()>>,
}

impl Transport {
    /// Bind and start serving with the real clock.
    pub async fn start<H: MessageHandler>(
        config: TransportConfig,
        security: SecurityConfig,
        handler: H,
    ) -> Result<Self, TransportError> {
        Self::start_with_clock(
            config,
            Arc::new(security),
            Arc::new(handler),
            Arc::new(TokioClock::new()),
        )
        .await
    }

    /// Start with a caller-supplied clock and a handler shared with other
    /// subsystems.
    pub async fn start_with_clock<H: MessageHandler>(
        config: TransportConfig,
        security: Arc<SecurityConfig>,
        handler: Arc<H>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let (commands, commands_rx) = mpsc::channel(HUB_QUEUE);
        let handle = TransportHandle::new(commands);
        let hub = Hub::new(&config, security.clone(), handler.clone(), clock);
        let hub_task = tokio::spawn(hub.run(commands_rx, config.heartbeat_interval));

        let path = normalize_path(&config.path);
        let state = Arc::new(AppState {
            transport: handle.clone(),
            handler,
            security,
            outbound_buffer: config.outbound_buffer,
        });
        let app = router(&path, state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("transport listener failed: {e}");
            }
        });

        info!(
            max_connections = config.max_connections,
            "MCP transport listening on ws://{local_addr}{path}"
        );

        Ok(Self {
            handle,
            local_addr,
            path,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
            hub: Some(hub_task),
        })
    }

    /// Cloneable handle for dispatchers and other tasks.
    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub async fn send(
        &self,
        message: impl Into<JsonRpcMessage>,
    ) -> Result<DeliveryReport, TransportError> {
        self.handle.send(message).await
    }

    pub async fn snapshot(&self) -> Result<TransportSnapshot, TransportError> {
        self.handle.snapshot().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.path)
    }

    /// Close every connection with 1001, fire `on_close`, and stop listening.
    /// Calling it again is a no-op.
    pub async fn close(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        if self
            .handle
            .request(|reply| HubCommand::Shutdown { reply })
            .await
            .is_err()
        {
            warn!("transport hub already stopped");
        }
        let _ = shutdown_tx.send(());

        if let Some(server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
                warn!("listener did not drain within {SHUTDOWN_GRACE:?}");
            }
        }
        if let Some(hub) = self.hub.take() {
            let _ = hub.await;
        }
        info!("MCP transport stopped");
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn router<H: MessageHandler>(path: &str, state: Arc<AppState<H>>) -> Router {
    Router::new()
        .route(path, get(ws_upgrade_handler::<H>))
        .route("/health", get(health_handler::<H>))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http_admission::<H>,
        ))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Method and size checks, preflight, and CORS headers on every response.
async fn http_admission<H: MessageHandler>(
    State(state): State<Arc<AppState<H>>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let cors_headers = cors::get_cors_headers(&state.security.cors, origin.as_deref());

    let mut response = match check_http_request(&state.security, request.method(), request.headers()) {
        Err(err) => rejection(&err),
        Ok(()) if request.method() == Method::OPTIONS => StatusCode::NO_CONTENT.into_response(),
        Ok(()) => next.run(request).await,
    };
    response.headers_mut().extend(cors_headers);
    response
}

fn check_http_request(
    security: &SecurityConfig,
    method: &Method,
    headers: &HeaderMap,
) -> Result<(), TransportError> {
    if !validation::validate_request_method(&security.validation, method.as_str()) {
        return Err(TransportError::MethodNotAllowed {
            method: method.to_string(),
        });
    }
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    if let Some(size) = declared {
        if !validation::validate_request_size(&security.validation, size) {
            return Err(TransportError::RequestTooLarge {
                size,
                limit: security.validation.max_request_size,
            });
        }
    }
    Ok(())
}

fn rejection(err: &TransportError) -> Response {
    let status = match err {
        TransportError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        TransportError::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    warn!(status = status.as_u16(), error = %err, "HTTP request rejected");
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn ws_upgrade_handler<H: MessageHandler>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
) -> Response {
    let context = create_request_context(&headers);
    let transport = state.transport.clone();
    let handler = state.handler.clone();
    let limits = SocketLimits {
        max_request_size: state.security.validation.max_request_size,
        outbound_buffer: state.outbound_buffer,
    };

    let ceiling = limits.read_ceiling();
    ws.max_message_size(ceiling)
        .max_frame_size(ceiling)
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {e}"))
        .on_upgrade(move |socket| serve_socket(socket, context, transport, handler, limits))
}

async fn health_handler<H: MessageHandler>(State(state): State<Arc<AppState<H>>>) -> Response {
    match state.transport.snapshot().await {
        Ok(snapshot) => Json(json!({
            "status": "ok",
            "connections": snapshot.connections.count,
            "averageAgeMs": snapshot.connections.average_age_ms,
            "pendingRequests": snapshot.pending_requests,
        }))
        .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "closed" })),
        )
            .into_response(),
    }
}
