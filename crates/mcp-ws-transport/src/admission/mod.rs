//! Admission control: API-key auth, fixed-window rate limiting, request
//! validation, and CORS header synthesis.
//!
//! Every check is a decision function; violations come back as values and the
//! transport picks the rejection (close code, error frame, HTTP status).

pub mod auth;
pub mod context;
pub mod cors;
pub mod policy;
pub mod rate_limit;
pub mod validation;

use std::sync::Arc;

pub use context::{RequestContext, create_request_context};
pub use policy::{
    AuthPolicy, CorsPolicy, RateLimitPolicy, SecurityConfig, ValidationPolicy, WindowPolicy,
};
pub use rate_limit::{RateLimitDecision, RateLimitScope, RateLimiter};

use crate::clock::Timestamp;
use crate::error::TransportError;

/// Owns the rate-limit counters; everything else reads the shared policy.
///
/// Lives inside the hub task, so counters have exactly one writer.
pub struct AdmissionGuard {
    config: Arc<SecurityConfig>,
    limiter: RateLimiter,
}

impl AdmissionGuard {
    pub fn new(config: Arc<SecurityConfig>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit.clone());
        Self { config, limiter }
    }

    pub fn validate_api_key(&self, key: Option<&str>) -> bool {
        auth::validate_api_key(&self.config.auth, key)
    }

    pub fn check_rate_limit(&mut self, context: &RequestContext, now: Timestamp) -> RateLimitDecision {
        self.limiter.check(&context.client_id, now)
    }

    pub fn record_request(&mut self, context: &RequestContext, success: bool, now: Timestamp) {
        self.limiter.record(&context.client_id, success, now);
    }

    /// Auth, then rate limit; the attempt is counted either way. An admitted
    /// handshake counts as a success.
    pub fn admit(&mut self, context: &RequestContext, now: Timestamp) -> Result<(), TransportError> {
        if !self.validate_api_key(context.api_key.as_deref()) {
            self.record_request(context, false, now);
            return Err(TransportError::AuthenticationFailure);
        }
        self.charge(context, now)?;
        self.settle(context, now, true, now);
        Ok(())
    }

    /// Rate-limit check for a frame on an admitted connection.
    ///
    /// Every frame is counted as a failure up front; [`Self::settle`] refunds
    /// it once the outcome is known to be a success.
    pub fn charge(&mut self, context: &RequestContext, now: Timestamp) -> Result<(), TransportError> {
        let decision = self.check_rate_limit(context, now);
        self.record_request(context, false, now);
        match decision.into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Outcome of a frame charged at `counted_at`. Successes are refunded by
    /// windows with `skip_successful_requests`; failures stay counted.
    pub fn settle(
        &mut self,
        context: &RequestContext,
        counted_at: Timestamp,
        success: bool,
        now: Timestamp,
    ) {
        if success {
            self.limiter.refund(&context.client_id, counted_at, now);
        }
    }

    /// Drop idle rate windows.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        self.limiter.sweep(now)
    }

    pub fn rate_window_count(&self) -> usize {
        self.limiter.window_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn context(client: &str, key: Option<&str>) -> RequestContext {
        RequestContext {
            client_id: client.into(),
            api_key: key.map(Into::into),
            user_agent: None,
            timestamp: Utc::now(),
            request_id: "r".into(),
        }
    }

    fn guard(auth: bool, global_max: u32) -> AdmissionGuard {
        let config = SecurityConfig {
            auth: AuthPolicy {
                enabled: auth,
                api_keys: vec!["k".into()],
            },
            rate_limit: RateLimitPolicy {
                enabled: true,
                global: WindowPolicy {
                    window_ms: 1_000,
                    max_requests: global_max,
                    skip_successful_requests: false,
                },
                per_client: WindowPolicy::default(),
            },
            ..SecurityConfig::default()
        };
        AdmissionGuard::new(Arc::new(config))
    }

    #[test]
    fn admit_rejects_bad_key_and_counts_it() {
        let mut g = guard(true, 100);
        let err = g.admit(&context("a", Some("wrong")), 0).unwrap_err();
        assert!(matches!(err, TransportError::AuthenticationFailure));
        assert_eq!(g.rate_window_count(), 2);
        assert!(g.admit(&context("a", Some("k")), 1).is_ok());
    }

    #[test]
    fn admit_applies_rate_limit_after_auth() {
        let mut g = guard(false, 2);
        assert!(g.admit(&context("a", None), 0).is_ok());
        assert!(g.admit(&context("b", None), 1).is_ok());
        let err = g.admit(&context("c", None), 2).unwrap_err();
        match err {
            TransportError::RateLimited {
                reason,
                retry_after_secs,
                ..
            } => {
                assert!(reason.contains("Global rate limit exceeded"));
                assert!(retry_after_secs > 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(g.admit(&context("d", None), 1_002).is_ok());
    }

    fn skipping_guard(client_max: u32) -> AdmissionGuard {
        let config = SecurityConfig {
            rate_limit: RateLimitPolicy {
                enabled: true,
                global: WindowPolicy {
                    window_ms: 1_000,
                    max_requests: 1_000,
                    skip_successful_requests: false,
                },
                per_client: WindowPolicy {
                    window_ms: 1_000,
                    max_requests: client_max,
                    skip_successful_requests: true,
                },
            },
            ..SecurityConfig::default()
        };
        AdmissionGuard::new(Arc::new(config))
    }

    #[test]
    fn charged_frames_count_until_settled_as_success() {
        let mut g = skipping_guard(2);
        let ctx = context("a", None);

        for t in 0..5 {
            g.charge(&ctx, t).unwrap();
            g.settle(&ctx, t, true, t);
        }

        g.charge(&ctx, 10).unwrap();
        g.settle(&ctx, 10, false, 11);
        g.charge(&ctx, 12).unwrap();
        g.settle(&ctx, 12, false, 13);
        assert!(matches!(
            g.charge(&ctx, 14),
            Err(TransportError::RateLimited { .. })
        ));
    }

    #[test]
    fn admitted_handshake_is_a_success() {
        let mut g = skipping_guard(1);
        for t in 0..3 {
            assert!(g.admit(&context("a", None), t).is_ok());
        }
    }

    #[test]
    fn sweep_clears_idle_windows() {
        let mut g = guard(false, 100);
        g.admit(&context("a", None), 0).unwrap();
        assert_eq!(g.sweep(120_001), 2);
    }
}
