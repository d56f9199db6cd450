//! Fixed-window rate limiting: one global window plus one per client id.

use std::collections::HashMap;

use crate::clock::Timestamp;
use crate::error::TransportError;

use super::policy::{RateLimitPolicy, WindowPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Global,
    Client,
}

impl RateLimitScope {
    fn reason(&self) -> &'static str {
        match self {
            Self::Global => "Global rate limit exceeded",
            Self::Client => "Client rate limit exceeded",
        }
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub scope: Option<RateLimitScope>,
    pub reason: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            scope: None,
            reason: None,
            retry_after_seconds: None,
        }
    }

    fn deny(scope: RateLimitScope, retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            scope: Some(scope),
            reason: Some(scope.reason().to_string()),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    /// `None` when allowed.
    pub fn into_error(self) -> Option<TransportError> {
        if self.allowed {
            return None;
        }
        let scope = self.scope.unwrap_or(RateLimitScope::Global);
        Some(TransportError::RateLimited {
            scope,
            reason: self.reason.unwrap_or_else(|| scope.reason().to_string()),
            retry_after_secs: self.retry_after_seconds.unwrap_or(1),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RateKey {
    Global,
    Client(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: Timestamp,
    pub last_seen: Timestamp,
}

impl RateWindow {
    /// Lazy reset: a window older than `window_ms` starts over at `now`.
    fn roll(&mut self, policy: &WindowPolicy, now: Timestamp) {
        if now.saturating_sub(self.window_start) >= policy.window_ms {
            self.count = 0;
            self.window_start = now;
        }
    }
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: HashMap<RateKey, RateWindow>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: HashMap::new(),
        }
    }

    /// Global window first, then the client's. Does not count the request.
    pub fn check(&mut self, client_id: &str, now: Timestamp) -> RateLimitDecision {
        if !self.policy.enabled {
            return RateLimitDecision::allow();
        }
        let global = self.policy.global;
        if let Some(denied) = self.check_window(RateKey::Global, &global, RateLimitScope::Global, now) {
            return denied;
        }
        let per_client = self.policy.per_client;
        let key = RateKey::Client(client_id.to_string());
        self.check_window(key, &per_client, RateLimitScope::Client, now)
            .unwrap_or_else(RateLimitDecision::allow)
    }

    fn check_window(
        &mut self,
        key: RateKey,
        policy: &WindowPolicy,
        scope: RateLimitScope,
        now: Timestamp,
    ) -> Option<RateLimitDecision> {
        let (count, window_start) = match self.windows.get_mut(&key) {
            Some(window) => {
                window.roll(policy, now);
                (window.count, window.window_start)
            }
            None => (0, now),
        };
        if count < policy.max_requests {
            return None;
        }
        let remaining_ms = (window_start + policy.window_ms).saturating_sub(now);
        Some(RateLimitDecision::deny(scope, remaining_ms.div_ceil(1000).max(1)))
    }

    /// Count one request against both windows, unless the window skips successes.
    pub fn record(&mut self, client_id: &str, success: bool, now: Timestamp) {
        if !self.policy.enabled {
            return;
        }
        let global = self.policy.global;
        let per_client = self.policy.per_client;
        self.bump(RateKey::Global, &global, success, now);
        self.bump(RateKey::Client(client_id.to_string()), &per_client, success, now);
    }

    fn bump(&mut self, key: RateKey, policy: &WindowPolicy, success: bool, now: Timestamp) {
        if policy.skip_successful_requests && success {
            return;
        }
        let window = self.windows.entry(key).or_insert(RateWindow {
            count: 0,
            window_start: now,
            last_seen: now,
        });
        window.roll(policy, now);
        window.count = window.count.saturating_add(1);
        window.last_seen = now;
    }

    /// Give back a count taken at `counted_at` once the request succeeded.
    /// Only windows that skip successes refund, and only if they have not
    /// rolled over since.
    pub fn refund(&mut self, client_id: &str, counted_at: Timestamp, now: Timestamp) {
        if !self.policy.enabled {
            return;
        }
        let global = self.policy.global;
        let per_client = self.policy.per_client;
        self.unbump(RateKey::Global, &global, counted_at, now);
        self.unbump(RateKey::Client(client_id.to_string()), &per_client, counted_at, now);
    }

    fn unbump(&mut self, key: RateKey, policy: &WindowPolicy, counted_at: Timestamp, now: Timestamp) {
        if !policy.skip_successful_requests {
            return;
        }
        if let Some(window) = self.windows.get_mut(&key) {
            window.roll(policy, now);
            if window.window_start <= counted_at {
                window.count = window.count.saturating_sub(1);
            }
        }
    }

    /// Drop windows idle longer than their own `window_ms`. Returns how many went.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let global_ms = self.policy.global.window_ms;
        let client_ms = self.policy.per_client.window_ms;
        let before = self.windows.len();
        self.windows.retain(|key, window| {
            let window_ms = match key {
                RateKey::Global => global_ms,
                RateKey::Client(_) => client_ms,
            };
            now.saturating_sub(window.last_seen) <= window_ms
        });
        before - self.windows.len()
    }

    /// Number of live windows (global included).
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn client_window(&self, client_id: &str) -> Option<RateWindow> {
        self.windows.get(&RateKey::Client(client_id.to_string())).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global_max: u32, client_max: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitPolicy {
            enabled: true,
            global: WindowPolicy {
                window_ms,
                max_requests: global_max,
                skip_successful_requests: false,
            },
            per_client: WindowPolicy {
                window_ms,
                max_requests: client_max,
                skip_successful_requests: false,
            },
        })
    }

    fn admit(rl: &mut RateLimiter, client: &str, now: Timestamp) -> RateLimitDecision {
        let decision = rl.check(client, now);
        rl.record(client, decision.allowed, now);
        decision
    }

    #[test]
    fn global_limit_allows_exactly_max_then_recovers() {
        let mut rl = limiter(2, 100, 1_000);

        assert!(admit(&mut rl, "a", 0).allowed);
        assert!(admit(&mut rl, "b", 10).allowed);

        let third = admit(&mut rl, "c", 20);
        assert!(!third.allowed);
        assert_eq!(third.scope, Some(RateLimitScope::Global));
        assert!(third.reason.as_deref().unwrap().contains("Global rate limit exceeded"));
        assert!(third.retry_after_seconds.unwrap() > 0);

        assert!(admit(&mut rl, "d", 1_000).allowed);
    }

    #[test]
    fn per_client_limit_is_independent_per_client() {
        let mut rl = limiter(1_000, 1, 60_000);

        assert!(admit(&mut rl, "alice", 0).allowed);
        let denied = admit(&mut rl, "alice", 1);
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_deref(), Some("Client rate limit exceeded"));

        assert!(admit(&mut rl, "bob", 2).allowed);
    }

    #[test]
    fn retry_after_rounds_up_remaining_window() {
        let mut rl = limiter(1, 100, 10_000);
        rl.record("a", true, 0);
        let d = rl.check("a", 2_500);
        assert_eq!(d.retry_after_seconds, Some(8));
    }

    #[test]
    fn check_does_not_count() {
        let mut rl = limiter(1, 1, 1_000);
        for t in 0..10 {
            assert!(rl.check("a", t).allowed);
        }
        assert_eq!(rl.window_count(), 0);
    }

    #[test]
    fn skip_successful_requests_counts_only_failures() {
        let mut rl = RateLimiter::new(RateLimitPolicy {
            enabled: true,
            global: WindowPolicy {
                window_ms: 1_000,
                max_requests: 1_000,
                skip_successful_requests: false,
            },
            per_client: WindowPolicy {
                window_ms: 1_000,
                max_requests: 2,
                skip_successful_requests: true,
            },
        });

        for t in 0..5 {
            rl.record("a", true, t);
        }
        assert!(rl.check("a", 6).allowed);
        assert!(rl.client_window("a").is_none());

        rl.record("a", false, 7);
        rl.record("a", false, 8);
        assert!(!rl.check("a", 9).allowed);
    }

    fn skipping_limiter(client_max: u32) -> RateLimiter {
        RateLimiter::new(RateLimitPolicy {
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
        })
    }

    #[test]
    fn refund_returns_the_slot_only_in_skipping_windows() {
        let mut rl = skipping_limiter(1);
        rl.record("a", false, 0);
        assert!(!rl.check("a", 1).allowed);

        rl.refund("a", 0, 2);
        assert!(rl.check("a", 3).allowed);
        assert_eq!(rl.client_window("a").unwrap().count, 0);
    }

    #[test]
    fn refund_after_window_rolled_is_ignored() {
        let mut rl = skipping_limiter(5);
        rl.record("a", false, 0);
        rl.record("a", false, 1_200);
        rl.refund("a", 0, 1_300);
        assert_eq!(rl.client_window("a").unwrap().count, 1);

        rl.refund("a", 1_200, 1_400);
        assert_eq!(rl.client_window("a").unwrap().count, 0);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let mut rl = RateLimiter::new(RateLimitPolicy {
            enabled: false,
            ..limiter(0, 0, 1).policy
        });
        rl.record("a", false, 0);
        assert!(rl.check("a", 0).allowed);
        assert_eq!(rl.window_count(), 0);
    }

    #[test]
    fn zero_max_denies_before_any_window_exists() {
        let mut rl = limiter(0, 10, 1_000);
        assert!(!rl.check("a", 0).allowed);
    }

    #[test]
    fn sweep_drops_idle_windows_only() {
        let mut rl = limiter(100, 100, 1_000);
        rl.record("old", true, 0);
        rl.record("fresh", true, 1_500);

        let removed = rl.sweep(2_100);
        assert_eq!(removed, 1);
        assert!(rl.client_window("old").is_none());
        assert!(rl.client_window("fresh").is_some());
    }

    #[test]
    fn denial_converts_to_rate_limited_error() {
        let mut rl = limiter(0, 10, 1_000);
        let err = rl.check("a", 0).into_error().unwrap();
        assert!(matches!(
            err,
            TransportError::RateLimited { scope: RateLimitScope::Global, .. }
        ));
        assert!(RateLimitDecision::allow().into_error().is_none());
    }
}
