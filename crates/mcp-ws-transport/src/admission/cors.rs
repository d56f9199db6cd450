//! CORS response headers.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderMap, HeaderValue};

use super::policy::CorsPolicy;

/// Headers to attach to a response for a request from `origin`.
///
/// Empty when CORS is disabled. `Access-Control-Allow-Origin` is present only
/// for an exactly matching origin, or for any origin under a `"*"` entry.
pub fn get_cors_headers(policy: &CorsPolicy, origin: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !policy.enabled {
        return headers;
    }

    let wildcard = policy.allowed_origins.iter().any(|o| o == "*");
    let allowed_origin = match origin {
        Some(origin) if wildcard || policy.allowed_origins.iter().any(|o| o == origin) => {
            Some(origin)
        }
        None if wildcard => Some("*"),
        _ => None,
    };
    if let Some(value) = allowed_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }

    if let Ok(value) = HeaderValue::from_str(&policy.allowed_methods.join(", ")) {
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&policy.allowed_headers.join(", ")) {
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
    }
    if let Some(max_age) = policy.max_age_seconds {
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(origins: &[&str]) -> CorsPolicy {
        CorsPolicy {
            enabled: true,
            allowed_origins: origins.iter().map(|o| o.to_string()).collect(),
            ..CorsPolicy::default()
        }
    }

    #[test]
    fn exact_origin_is_echoed() {
        let h = get_cors_headers(&policy(&["https://a.com"]), Some("https://a.com"));
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://a.com");
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "GET, POST, OPTIONS");
    }

    #[test]
    fn foreign_origin_omits_allow_origin() {
        let h = get_cors_headers(&policy(&["https://a.com"]), Some("https://evil.com"));
        assert!(h.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(h.get(ACCESS_CONTROL_ALLOW_HEADERS).is_some());
    }

    #[test]
    fn wildcard_allows_any_origin() {
        let p = policy(&["*"]);
        let h = get_cors_headers(&p, Some("https://anything.dev"));
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://anything.dev");
        let h = get_cors_headers(&p, None);
        assert_eq!(h.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }

    #[test]
    fn disabled_yields_no_headers() {
        let p = CorsPolicy {
            enabled: false,
            ..policy(&["*"])
        };
        assert!(get_cors_headers(&p, Some("https://a.com")).is_empty());
    }

    #[test]
    fn max_age_is_optional() {
        let mut p = policy(&["*"]);
        assert_eq!(get_cors_headers(&p, None).get(ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
        p.max_age_seconds = None;
        assert!(get_cors_headers(&p, None).get(ACCESS_CONTROL_MAX_AGE).is_none());
    }
}
