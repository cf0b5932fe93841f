//! URL validation and SSRF protection for webhook endpoints.
//!
//! Applied when endpoints are registered or updated, never on the delivery
//! hot path. Protocol and private-network restrictions are environment
//! dependent: production requires HTTPS and public hosts, development can
//! opt into HTTP and internal targets.

use std::net::IpAddr;

use crate::error::WebhookError;

/// Validate a webhook endpoint URL.
///
/// Checks:
/// 1. URL is parseable and absolute
/// 2. Scheme is HTTPS (or HTTP if `allow_http` is set for dev/test)
/// 3. Host is not a private/internal address (SSRF protection), unless
///    `allow_internal_hosts` is set
pub fn validate_endpoint_url(
    url: &str,
    allow_http: bool,
    allow_internal_hosts: bool,
) -> Result<(), WebhookError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "Webhook URLs must use HTTPS".to_string(),
            ));
        }
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    if !allow_internal_hosts {
        validate_host_not_internal(host)?;
    }

    Ok(())
}

/// Validate that a host is not a private/internal address.
///
/// Blocks:
/// - Loopback addresses (127.0.0.0/8)
/// - Private networks (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16)
/// - Link-local (169.254.0.0/16, the cloud metadata range)
/// - CGNAT (100.64.0.0/10)
/// - IPv6 loopback and unspecified
/// - Internal hostnames (localhost, *.internal, *.local)
pub fn validate_host_not_internal(host: &str) -> Result<(), WebhookError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(WebhookError::SsrfDetected(format!(
                "Destination host {host} is a private/internal address"
            )));
        }
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost"
        || lower == "metadata.google.internal"
        || lower.ends_with(".internal")
        || lower.ends_with(".local")
    {
        return Err(WebhookError::SsrfDetected(format!(
            "Destination host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

/// Check if an IP address belongs to a private/internal range.
fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()                // 127.0.0.0/8
                || v4.is_private()          // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || v4.is_link_local()       // 169.254.0.0/16
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // 100.64.0.0/10 (CGNAT)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Validate an HTTP method name for an endpoint.
///
/// Webhook targets accept payload-bearing methods only.
pub fn validate_http_method(method: &str) -> Result<(), WebhookError> {
    match method.to_ascii_uppercase().as_str() {
        "POST" | "PUT" | "PATCH" => Ok(()),
        other => Err(WebhookError::Validation(format!(
            "Unsupported HTTP method for webhook delivery: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // --- URL validation ---

    #[test]
    fn test_valid_https_url() {
        assert!(validate_endpoint_url("https://example.com/webhooks", false, false).is_ok());
    }

    #[test]
    fn test_valid_https_url_with_port() {
        assert!(
            validate_endpoint_url("https://hooks.example.com:8443/callback", false, false).is_ok()
        );
    }

    #[test]
    fn test_http_url_rejected_in_production() {
        let result = validate_endpoint_url("http://example.com/webhooks", false, false);
        assert!(matches!(result, Err(WebhookError::InvalidUrl(_))));
    }

    #[test]
    fn test_http_url_allowed_in_dev() {
        assert!(validate_endpoint_url("http://example.com/webhooks", true, false).is_ok());
    }

    #[test]
    fn test_invalid_url_format() {
        assert!(validate_endpoint_url("not-a-url", false, false).is_err());
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(validate_endpoint_url("ftp://example.com/webhooks", false, false).is_err());
    }

    #[test]
    fn test_internal_hosts_allowed_when_opted_in() {
        assert!(validate_endpoint_url("http://localhost:8080/hook", true, true).is_ok());
    }

    // --- SSRF protection ---

    #[test]
    fn test_ssrf_blocks_loopback() {
        assert!(validate_host_not_internal("127.0.0.1").is_err());
    }

    #[test]
    fn test_ssrf_blocks_private_ranges() {
        assert!(validate_host_not_internal("10.0.0.1").is_err());
        assert!(validate_host_not_internal("172.16.0.1").is_err());
        assert!(validate_host_not_internal("192.168.1.1").is_err());
    }

    #[test]
    fn test_ssrf_blocks_link_local_metadata() {
        assert!(validate_host_not_internal("169.254.169.254").is_err());
    }

    #[test]
    fn test_ssrf_blocks_cgnat() {
        assert!(validate_host_not_internal("100.64.0.1").is_err());
        assert!(validate_host_not_internal("100.127.255.255").is_err());
    }

    #[test]
    fn test_ssrf_blocks_ipv6_loopback_and_unspecified() {
        assert!(validate_host_not_internal("::1").is_err());
        assert!(validate_host_not_internal("::").is_err());
    }

    #[test]
    fn test_ssrf_blocks_internal_hostnames() {
        assert!(validate_host_not_internal("localhost").is_err());
        assert!(validate_host_not_internal("LOCALHOST").is_err());
        assert!(validate_host_not_internal("metadata.google.internal").is_err());
        assert!(validate_host_not_internal("service.internal").is_err());
        assert!(validate_host_not_internal("myhost.local").is_err());
    }

    #[test]
    fn test_ssrf_allows_public_hosts() {
        assert!(validate_host_not_internal("8.8.8.8").is_ok());
        assert!(validate_host_not_internal("example.com").is_ok());
        assert!(validate_host_not_internal("hooks.myapp.io").is_ok());
    }

    #[test]
    fn test_ssrf_url_integration() {
        let result = validate_endpoint_url("https://10.0.0.1/webhook", false, false);
        assert!(matches!(result, Err(WebhookError::SsrfDetected(_))));
    }

    // --- HTTP method validation ---

    #[test]
    fn test_valid_methods() {
        assert!(validate_http_method("POST").is_ok());
        assert!(validate_http_method("put").is_ok());
        assert!(validate_http_method("Patch").is_ok());
    }

    #[test]
    fn test_invalid_methods() {
        assert!(validate_http_method("GET").is_err());
        assert!(validate_http_method("DELETE").is_err());
        assert!(validate_http_method("TRACE").is_err());
    }
}
