//! QuickNode provider profile.

use chainconn_core::endpoint::{CredentialRef, EndpointConfig};

/// Requests per second on the entry plan.
pub const DEFAULT_PER_SECOND: u32 = 25;

/// Endpoint for a QuickNode URL.
///
/// QuickNode uses personal subdomain URLs, not a shared API key template.
/// If the token is kept out of the URL, put `{api_key}` where it belongs and
/// name the variable holding it.
pub fn endpoint(endpoint_url: impl Into<String>, token_env: Option<&str>) -> EndpointConfig {
    let endpoint = EndpointConfig::new(endpoint_url)
        .with_rate_limit(DEFAULT_PER_SECOND * 60)
        .with_burst(DEFAULT_PER_SECOND);
    match token_env {
        Some(var) => endpoint.with_credential(CredentialRef::env(var)),
        None => endpoint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_needs_no_credential() {
        let ep = endpoint("https://example.quiknode.pro/abc/", None);
        assert!(!ep.requires_auth);
        assert_eq!(ep.max_requests_per_minute, 1_500);
    }

    #[test]
    fn templated_url_takes_token() {
        let ep = endpoint("https://example.quiknode.pro/{api_key}/", Some("QUICKNODE_TOKEN"));
        assert!(ep.requires_auth);
        assert_eq!(ep.credential, Some(CredentialRef::env("QUICKNODE_TOKEN")));
    }
}
