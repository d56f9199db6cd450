//! Security policy snapshot.
//!
//! Built once by the embedding application (CLI flags, a JSON document, ...)
//! and handed to the transport behind an `Arc`. Nothing in this crate mutates it.
//!
//! ```json
//! {
//!   "auth": { "enabled": true, "apiKeys": ["k1"] },
//!   "rateLimit": {
//!     "global":    { "windowMs": 60000, "maxRequests": 1000 },
//!     "perClient": { "windowMs": 60000, "maxRequests": 100, "skipSuccessfulRequests": false }
//!   },
//!   "validation": { "maxRequestSize": 10485760, "allowedMethods": ["GET", "POST"] },
//!   "cors": { "enabled": true, "allowedOrigins": ["https://a.com"] }
//! }
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub auth: AuthPolicy,
    pub rate_limit: RateLimitPolicy,
    pub validation: ValidationPolicy,
    pub cors: CorsPolicy,
}

/// API-key authentication.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthPolicy {
    pub enabled: bool,
    pub api_keys: Vec<String>,
}

impl std::fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPolicy")
            .field("enabled", &self.enabled)
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .finish()
    }
}

/// One fixed-window counter's thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowPolicy {
    pub window_ms: u64,
    pub max_requests: u32,
    /// Only failed requests are counted when set.
    pub skip_successful_requests: bool,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
            skip_successful_requests: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub global: WindowPolicy,
    pub per_client: WindowPolicy,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            global: WindowPolicy {
                max_requests: 1000,
                ..WindowPolicy::default()
            },
            per_client: WindowPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationPolicy {
    /// Byte ceiling for HTTP bodies and individual WebSocket frames.
    pub max_request_size: usize,
    /// HTTP methods accepted by the endpoint (case-insensitive). Empty allows all.
    pub allowed_methods: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_request_size: 10 * 1024 * 1024,
            allowed_methods: vec!["GET".into(), "POST".into(), "OPTIONS".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsPolicy {
    pub enabled: bool,
    /// Exact origins, or `"*"` for any.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_seconds: Option<u64>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: vec!["GET".into(), "POST".into(), "OPTIONS".into()],
            allowed_headers: vec![
                "Content-Type".into(),
                "Authorization".into(),
                "X-API-Key".into(),
            ],
            max_age_seconds: Some(86_400),
        }
    }
}
