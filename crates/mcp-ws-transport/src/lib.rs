//! Multi-client WebSocket transport for MCP servers.
//!
//! Presents many concurrent WebSocket clients to a single JSON-RPC dispatcher
//! as if it were talking to one peer. Outbound responses are routed back to the
//! connection that issued the request; everything else is broadcast.
//!
//! # Architecture
//!
//! ```text
//! socket ──▶ reader ──▶ hub (registry, correlator, admission, heartbeat)
//!                 │           ▲
//!                 ▼           │ send()
//!              dispatcher ────┘
//! ```
//!
//! The hub is a single task with exclusive ownership of all per-connection
//! state. Everything else talks to it through [`TransportHandle`].

pub mod admission;
pub mod clock;
pub mod config;
mod connection;
pub mod correlator;
pub mod error;
pub mod heartbeat;
mod hub;
pub mod registry;
pub mod server;

pub use admission::{AdmissionGuard, RequestContext, SecurityConfig};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::TransportConfig;
pub use correlator::RequestCorrelator;
pub use error::TransportError;
pub use heartbeat::{HeartbeatAction, HeartbeatSupervisor};
pub use hub::{DeliveryReport, Route, TransportHandle, TransportSnapshot};
pub use registry::{ConnectionId, ConnectionRegistry, RegistrySnapshot};
pub use server::{MessageHandler, Transport};
