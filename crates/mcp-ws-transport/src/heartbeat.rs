//! Liveness probing and idle eviction.
//!
//! Each tick, per connection:
//! - no pong since the last probe → terminate
//! - no inbound traffic for longer than `client_timeout` → close 1000 "Client timeout"
//! - otherwise → mark not-alive and ping
//!
//! Pongs only restore `is_alive`; a client that answers pings but never sends
//! a frame is still evicted for idleness.

use crate::clock::Timestamp;
use crate::registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatAction {
    Ping(ConnectionId),
    Terminate(ConnectionId),
    IdleTimeout { id: ConnectionId, idle_ms: u64 },
}

pub struct HeartbeatSupervisor {
    client_timeout_ms: u64,
}

impl HeartbeatSupervisor {
    pub fn new(client_timeout_ms: u64) -> Self {
        Self { client_timeout_ms }
    }

    /// Decide what happens to every connection this tick. Pinged connections
    /// are flipped to not-alive here; the caller carries out the actions.
    pub fn sweep(&self, registry: &mut ConnectionRegistry, now: Timestamp) -> Vec<HeartbeatAction> {
        let mut actions = Vec::with_capacity(registry.len());
        for conn in registry.iter_mut() {
            if !conn.is_alive {
                actions.push(HeartbeatAction::Terminate(conn.id.clone()));
                continue;
            }
            let idle_ms = conn.idle_for(now);
            if idle_ms > self.client_timeout_ms {
                actions.push(HeartbeatAction::IdleTimeout {
                    id: conn.id.clone(),
                    idle_ms,
                });
                continue;
            }
            conn.is_alive = false;
            actions.push(HeartbeatAction::Ping(conn.id.clone()));
        }
        actions
    }
}
