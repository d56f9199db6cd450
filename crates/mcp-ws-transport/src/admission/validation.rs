//! Request size and HTTP method checks.

use super::policy::ValidationPolicy;

pub fn validate_request_size(policy: &ValidationPolicy, size: usize) -> bool {
    size <= policy.max_request_size
}

/// Case-insensitive allow-list match. An empty list allows every method.
pub fn validate_request_method(policy: &ValidationPolicy, method: &str) -> bool {
    policy.allowed_methods.is_empty()
        || policy
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
}
