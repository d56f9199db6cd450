//! Live connection records and the capacity limit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use mcp_ws_protocol::{CloseCode, CloseReason};
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::admission::RequestContext;
use crate::clock::Timestamp;
use crate::error::TransportError;

/// Opaque, collision-resistant connection id (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(Utf8Bytes),
    Ping,
    Close { code: CloseCode, reason: String },
}

/// Write side of a connection as seen by the hub.
///
/// Sends never wait: a full queue is a delivery failure, not backpressure on
/// the hub.
#[derive(Debug, Clone)]
pub struct ConnectionSink {
    frames: mpsc::Sender<Outbound>,
    kill: Arc<Notify>,
}

/// Receiving half, owned by the connection's writer task.
#[derive(Debug)]
pub struct OutboundQueue {
    pub frames: mpsc::Receiver<Outbound>,
    pub kill: Arc<Notify>,
}

impl ConnectionSink {
    pub fn channel(buffer: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let kill = Arc::new(Notify::new());
        (
            Self {
                frames: tx,
                kill: kill.clone(),
            },
            OutboundQueue { frames: rx, kill },
        )
    }

    pub fn try_send(&self, frame: Outbound) -> Result<(), &'static str> {
        self.frames.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "outbound queue full",
            mpsc::error::TrySendError::Closed(_) => "connection closed",
        })
    }

    /// Graceful close; falls back to [`Self::terminate`] when the queue is full.
    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        let frame = Outbound::Close {
            code,
            reason: reason.into(),
        };
        if self.try_send(frame).is_err() {
            self.terminate();
        }
    }

    /// Drop the socket without a close frame.
    pub fn terminate(&self) {
        self.kill.notify_one();
    }
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    sink: ConnectionSink,
    /// Handshake identity, reused for per-frame rate limiting.
    pub context: RequestContext,
    pub is_alive: bool,
    pub connected_at: Timestamp,
    pub last_activity: Timestamp,
    pub message_count: u64,
}

impl Connection {
    pub fn deliver(&self, frame: Outbound) -> Result<(), TransportError> {
        self.sink
            .try_send(frame)
            .map_err(|reason| TransportError::DeliveryFailure {
                connection_id: self.id.clone(),
                reason,
            })
    }

    pub fn close(&self, code: CloseCode, reason: impl Into<String>) {
        self.sink.close(code, reason);
    }

    pub fn terminate(&self) {
        self.sink.terminate();
    }

    pub fn idle_for(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.last_activity)
    }
}

/// Read-only view for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub ids: Vec<ConnectionId>,
    pub count: usize,
    pub average_age_ms: u64,
}

pub struct ConnectionRegistry {
    max_connections: usize,
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            connections: HashMap::new(),
        }
    }

    /// Register a new connection, or close `sink` with 1013 when full.
    ///
    /// A rejected connection is never registered.
    pub fn accept(
        &mut self,
        sink: ConnectionSink,
        context: RequestContext,
        now: Timestamp,
    ) -> Result<ConnectionId, TransportError> {
        if self.connections.len() >= self.max_connections {
            sink.close(CloseCode::TryAgainLater, CloseReason::SERVER_AT_CAPACITY);
            return Err(TransportError::CapacityExceeded {
                max: self.max_connections,
            });
        }

        let id = ConnectionId::generate();
        debug!(conn_id = %id, client_id = %context.client_id, "connection registered");
        self.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                sink,
                context,
                is_alive: true,
                connected_at: now,
                last_activity: now,
                message_count: 0,
            },
        );
        Ok(id)
    }

    /// Inbound traffic: refresh `last_activity` and bump the message count.
    pub fn touch(&mut self, id: &ConnectionId, now: Timestamp) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.last_activity = now;
                conn.message_count += 1;
                true
            }
            None => false,
        }
    }

    /// Pong received. Liveness only; does not count as activity.
    pub fn mark_alive(&mut self, id: &ConnectionId) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.is_alive = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, conn)| conn).collect()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn snapshot(&self, now: Timestamp) -> RegistrySnapshot {
        let mut ids: Vec<ConnectionId> = self.connections.keys().cloned().collect();
        ids.sort();
        let count = ids.len();
        let total_age: u64 = self
            .connections
            .values()
            .map(|c| now.saturating_sub(c.connected_at))
            .sum();
        RegistrySnapshot {
            ids,
            count,
            average_age_ms: if count == 0 { 0 } else { total_age / count as u64 },
        }
    }
}
