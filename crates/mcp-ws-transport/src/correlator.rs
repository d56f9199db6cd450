//! Maps outstanding request ids to the connection that sent them.
//!
//! Once a request reaches the dispatcher nothing in the message says which
//! socket it came from, so the reply path looks it up here.
//!
//! Ids are global across connections: if two connections have the same id in
//! flight, the later one owns the entry and the earlier request's response
//! falls back to broadcast (or goes to the later connection). This
//! last-writer-wins behaviour is kept on purpose and logged when it happens.

use std::collections::HashMap;

use mcp_ws_protocol::{JsonRpcMessage, RequestId};
use tracing::{debug, warn};

use crate::clock::Timestamp;
use crate::registry::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub connection_id: ConnectionId,
    pub timestamp: Timestamp,
}

pub struct RequestCorrelator {
    ttl_ms: u64,
    pending: HashMap<RequestId, PendingRequest>,
}

impl RequestCorrelator {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            pending: HashMap::new(),
        }
    }

    /// Remember who sent `request_id`. Returns the entry it displaced, if any.
    pub fn record_request(
        &mut self,
        request_id: RequestId,
        connection_id: ConnectionId,
        now: Timestamp,
    ) -> Option<PendingRequest> {
        let previous = self.pending.insert(
            request_id.clone(),
            PendingRequest {
                connection_id: connection_id.clone(),
                timestamp: now,
            },
        );
        if let Some(prev) = &previous {
            if prev.connection_id != connection_id {
                warn!(
                    request_id = %request_id,
                    previous = %prev.connection_id,
                    current = %connection_id,
                    "request id collision across connections; last writer wins"
                );
            }
        }
        previous
    }

    /// Consume the entry for an outbound response. `None` for requests,
    /// notifications, id-less responses, and unknown ids.
    pub fn resolve(&mut self, message: &JsonRpcMessage) -> Option<ConnectionId> {
        self.take_pending(message).map(|p| p.connection_id)
    }

    /// Like [`Self::resolve`], keeping when the request was recorded.
    pub fn take_pending(&mut self, message: &JsonRpcMessage) -> Option<PendingRequest> {
        let JsonRpcMessage::Response(response) = message else {
            return None;
        };
        let id = response.id.as_ref()?;
        let entry = self.pending.remove(id);
        if entry.is_none() {
            debug!(request_id = %id, "no origin recorded for response");
        }
        entry
    }

    /// Purge every entry owned by a disconnecting connection.
    pub fn evict_by_connection(&mut self, connection_id: &ConnectionId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| &p.connection_id != connection_id);
        before - self.pending.len()
    }

    /// Drop entries older than the TTL.
    pub fn sweep_expired(&mut self, now: Timestamp) -> usize {
        let ttl = self.ttl_ms;
        let before = self.pending.len();
        self.pending
            .retain(|_, p| now.saturating_sub(p.timestamp) <= ttl);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
