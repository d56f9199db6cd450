//! API-key extraction and validation.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use super::policy::AuthPolicy;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Pull an API key out of the handshake headers.
///
/// Tried in order: `Authorization: Bearer <key>`, `Authorization: ApiKey <key>`,
/// then `X-API-Key`. Scheme names match case-insensitively.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let from_authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|value| {
            let (scheme, key) = value.trim().split_once(' ')?;
            let key = key.trim();
            let known = scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("apikey");
            (known && !key.is_empty()).then(|| key.to_string())
        });

    from_authorization.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    })
}

/// Always `true` when auth is disabled; otherwise the key must be on the allow-list.
pub fn validate_api_key(policy: &AuthPolicy, key: Option<&str>) -> bool {
    if !policy.enabled {
        return true;
    }
    match key {
        Some(key) => policy.api_keys.iter().any(|k| k == key),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn policy(keys: &[&str]) -> AuthPolicy {
        AuthPolicy {
            enabled: true,
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn bearer_token() {
        let h = headers(&[("authorization", "Bearer secret-1")]);
        assert_eq!(extract_api_key(&h).as_deref(), Some("secret-1"));
    }

    #[test]
    fn apikey_scheme() {
        let h = headers(&[("authorization", "ApiKey secret-2")]);
        assert_eq!(extract_api_key(&h).as_deref(), Some("secret-2"));
    }

    #[test]
    fn x_api_key_header() {
        let h = headers(&[("x-api-key", "secret-3")]);
        assert_eq!(extract_api_key(&h).as_deref(), Some("secret-3"));
    }

    #[test]
    fn authorization_wins_over_x_api_key() {
        let h = headers(&[("authorization", "Bearer first"), ("x-api-key", "second")]);
        assert_eq!(extract_api_key(&h).as_deref(), Some("first"));
    }

    #[test]
    fn unknown_scheme_falls_through_to_header() {
        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz"), ("x-api-key", "k")]);
        assert_eq!(extract_api_key(&h).as_deref(), Some("k"));
    }

    #[test]
    fn no_key() {
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn disabled_auth_accepts_anything() {
        let p = AuthPolicy::default();
        assert!(validate_api_key(&p, None));
        assert!(validate_api_key(&p, Some("whatever")));
    }

    #[test]
    fn enabled_auth_checks_allow_list() {
        let p = policy(&["good"]);
        assert!(validate_api_key(&p, Some("good")));
        assert!(!validate_api_key(&p, Some("bad")));
        assert!(!validate_api_key(&p, None));
    }
}
