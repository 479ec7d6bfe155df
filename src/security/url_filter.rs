//! URL validation and hostname allow-listing.
//!
//! Dangerous schemes are rejected unconditionally. Beyond that, a URL must
//! parse with a hostname, satisfy the HTTPS policy (local and private hosts
//! are exempt), and land on the allow-list when one is configured.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::Url;

use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::matcher;

/// Schemes capable of script injection or local-file access.
const DANGEROUS_SCHEMES: &[&str] = &["javascript:", "data:", "vbscript:", "file:", "about:"];

/// Hostname filter policy derived from configuration.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    allowlist: Vec<String>,
    require_https: bool,
    block_private_ips: bool,
}

impl UrlPolicy {
    /// Build a policy from the security configuration.
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            allowlist: config.url_allowlist.clone(),
            require_https: config.require_https,
            block_private_ips: config.block_private_ips,
        }
    }

    /// Policy that admits any non-dangerous URL.
    pub fn permissive() -> Self {
        Self {
            allowlist: Vec::new(),
            require_https: false,
            block_private_ips: false,
        }
    }

    /// Validate URL format and scheme policy.
    ///
    /// Does not consult the allow-list; see [`UrlPolicy::authorize`] for the
    /// combined check.
    pub fn validate(&self, raw: &str) -> Result<Url> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidParams("URL is empty".into()));
        }

        if is_dangerous_url(trimmed) {
            return Err(Error::InvalidParams(format!(
                "dangerous URL scheme: {}",
                truncate(trimmed, 32)
            )));
        }

        let parsed = Url::parse(trimmed)
            .map_err(|_| Error::InvalidParams("invalid URL format".into()))?;

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Err(Error::InvalidParams(
                    "URL must have a valid hostname".into(),
                ))
            }
        };

        if self.require_https && parsed.scheme() != "https" && !self.https_exempt(&host) {
            return Err(Error::InvalidParams(
                "HTTPS is required for non-local URLs".into(),
            ));
        }

        Ok(parsed)
    }

    /// Whether the URL's hostname passes the allow-list.
    ///
    /// An empty allow-list admits any URL that survived [`UrlPolicy::validate`].
    pub fn allowlisted(&self, url: &Url) -> bool {
        if self.allowlist.is_empty() {
            return !is_dangerous_url(url.as_str());
        }
        match url.host_str() {
            Some(host) => matcher::host_allowed(host, &self.allowlist),
            None => false,
        }
    }

    /// Validate the URL and enforce the allow-list in one step.
    pub fn authorize(&self, raw: &str) -> Result<Url> {
        let url = self.validate(raw)?;
        if !self.allowlisted(&url) {
            return Err(Error::Authorization(format!(
                "URL is not in the allowed list: {url}"
            )));
        }
        Ok(url)
    }

    /// Local and (unless blocked by policy) private hosts skip the HTTPS
    /// requirement.
    fn https_exempt(&self, host: &str) -> bool {
        if is_localhost(host) {
            return true;
        }
        !self.block_private_ips && is_private_ip(host)
    }
}

/// Whether the raw string starts with a script-injection-capable scheme.
pub fn is_dangerous_url(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    DANGEROUS_SCHEMES.iter().any(|s| lower.starts_with(s))
}

fn is_localhost(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    lower == "localhost" || lower == "127.0.0.1" || lower == "::1" || lower == "[::1]"
}

fn is_private_ip(host: &str) -> bool {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_v4(v4),
        Ok(IpAddr::V6(v6)) => is_private_v6(v6),
        Err(_) => false,
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || octets[0] == 0
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        // fc00::/7 unique-local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowlist: &[&str], require_https: bool) -> UrlPolicy {
        UrlPolicy {
            allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
            require_https,
            block_private_ips: false,
        }
    }

    #[test]
    fn dangerous_schemes_always_rejected() {
        let open = UrlPolicy::permissive();
        for raw in [
            "javascript:alert(1)",
            "data:text/html,<script>1</script>",
            "vbscript:msgbox",
            "file:///etc/passwd",
            "about:blank",
            "  JAVASCRIPT:alert(1)",
        ] {
            assert!(open.validate(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn https_required_for_public_hosts() {
        let p = policy(&[], true);
        assert!(p.validate("http://insecure.com/page").is_err());
        assert!(p.validate("https://secure.com/page").is_ok());
    }

    #[test]
    fn local_hosts_exempt_from_https() {
        let p = policy(&[], true);
        assert!(p.validate("http://localhost:3000").is_ok());
        assert!(p.validate("http://127.0.0.1:8080").is_ok());
        assert!(p.validate("http://192.168.1.10/admin").is_ok());
        assert!(p.validate("http://10.0.0.5").is_ok());
    }

    #[test]
    fn blocking_private_ips_removes_the_exemption() {
        let p = UrlPolicy {
            allowlist: Vec::new(),
            require_https: true,
            block_private_ips: true,
        };
        assert!(p.validate("http://192.168.1.10/admin").is_err());
        // localhost stays exempt.
        assert!(p.validate("http://localhost:3000").is_ok());
    }

    #[test]
    fn hostname_is_required() {
        let p = UrlPolicy::permissive();
        assert!(p.validate("https:///nohost").is_err());
        assert!(p.validate("not a url").is_err());
        assert!(p.validate("").is_err());
    }

    #[test]
    fn allowlist_wildcard_matches_single_subdomain() {
        let p = policy(&["*.allowed.com"], false);
        assert!(p.authorize("https://allowed.com/").is_ok());
        assert!(p.authorize("https://sub.allowed.com/").is_ok());
        assert!(p.authorize("https://a.b.allowed.com/").is_err());
        assert!(p.authorize("https://denied.com/").is_err());
    }

    #[test]
    fn empty_allowlist_admits_any_valid_url() {
        let p = policy(&[], false);
        assert!(p.authorize("https://anything.example.net/path").is_ok());
        assert!(p.authorize("javascript:alert(1)").is_err());
    }

    #[test]
    fn allowlist_denial_is_authorization_error() {
        let p = policy(&["allowed.com"], false);
        match p.authorize("https://denied.com/") {
            Err(Error::Authorization(_)) => {}
            other => panic!("expected authorization error, got {other:?}"),
        }
    }

    #[test]
    fn private_ip_detection() {
        assert!(is_private_ip("10.1.2.3"));
        assert!(is_private_ip("172.16.0.1"));
        assert!(is_private_ip("172.31.255.255"));
        assert!(!is_private_ip("172.32.0.1"));
        assert!(is_private_ip("192.168.0.1"));
        assert!(is_private_ip("169.254.1.1"));
        assert!(is_private_ip("0.0.0.0"));
        assert!(is_private_ip("fc00::1"));
        assert!(is_private_ip("fe80::1"));
        assert!(!is_private_ip("8.8.8.8"));
        assert!(!is_private_ip("example.com"));
    }
}
