//! Transport server configuration.

use std::time::Duration;

use crate::error::TransportError;

/// Listener, capacity, and timer settings. Security policy lives separately in
/// [`crate::admission::SecurityConfig`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// WebSocket endpoint path
    pub path: String,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Ping cadence; also drives correlation and rate-window sweeps
    pub heartbeat_interval: Duration,
    /// Close connections with no inbound traffic for this long
    pub client_timeout: Duration,
    /// Drop correlation entries never answered within this long
    pub request_ttl: Duration,
    /// How often idle rate windows are swept
    pub rate_limit_sweep_interval: Duration,
    /// Per-connection outbound queue depth (frames)
    pub outbound_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7080,
            hostname: "127.0.0.1".into(),
            path: "/mcp".into(),
            max_connections: 100,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(60),
            request_ttl: Duration::from_secs(60),
            rate_limit_sweep_interval: Duration::from_secs(5 * 60),
            outbound_buffer: 256,
        }
    }
}

impl TransportConfig {
    /// Reject settings the hub cannot run with.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.heartbeat_interval.is_zero() {
            return Err(TransportError::InvalidConfig("heartbeat_interval must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn ms(d: Duration) -> u64 {
        d.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let config = TransportConfig {
            heartbeat_interval: Duration::ZERO,
            ..TransportConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransportError::InvalidConfig(_))
        ));
    }
}
