//! Handshake-derived request identity.
//!
//! Every admission check reads from a [`RequestContext`]; nothing else looks at
//! raw headers.

use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::auth::extract_api_key;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

#[derive(Clone)]
pub struct RequestContext {
    /// Explicit `X-Client-Id`, else a fingerprint of user-agent + forwarded IP.
    pub client_id: String,
    pub api_key: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("client_id", &self.client_id)
            .field("has_api_key", &self.api_key.is_some())
            .field("user_agent", &self.user_agent)
            .field("timestamp", &self.timestamp)
            .field("request_id", &self.request_id)
            .finish()
    }
}

pub fn create_request_context(headers: &HeaderMap) -> RequestContext {
    let user_agent = header_str(headers, USER_AGENT.as_str()).map(str::to_string);
    let client_id = header_str(headers, CLIENT_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| fingerprint(user_agent.as_deref(), forwarded_ip(headers)));

    RequestContext {
        client_id,
        api_key: extract_api_key(headers),
        user_agent,
        timestamp: Utc::now(),
        request_id: uuid::Uuid::new_v4().to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, REAL_IP_HEADER))
}

// Clients behind one NAT with the same user agent share an id.
fn fingerprint(user_agent: Option<&str>, ip: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.unwrap_or("unknown").as_bytes());
    hasher.update(b"|");
    hasher.update(ip.unwrap_or("unknown").as_bytes());
    hex::encode(&hasher.finalize()[..8])
}
