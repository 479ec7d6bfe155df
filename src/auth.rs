//! Token authentication and permission checks.
//!
//! Tokens arrive as raw values or `Bearer`-prefixed header strings and are
//! validated against, in order: the disabled-auth short circuit, the static
//! configured token, a token file, the issued-token store (with lazy expiry
//! eviction), and finally an optional gateway delegate. The first source that
//! recognizes the token wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::config::{AuthConfig, AuthMode};
use crate::error::{Error, Result};
use crate::matcher;
use crate::security::AuditLog;

/// Permissions granted to authenticated clients by default.
pub fn default_permissions() -> Vec<String> {
    [
        "browser.navigate",
        "browser.screenshot",
        "browser.click",
        "browser.fill",
        "browser.snapshot",
        "browser.scroll",
        "browser.evaluate",
        "browser.close",
        "session.*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Established caller identity.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    /// Client id bound to the credential.
    pub client_id: String,
    /// Granted permissions.
    pub permissions: Vec<String>,
}

impl AuthIdentity {
    /// The identity used when authentication is disabled.
    pub fn anonymous() -> Self {
        Self {
            client_id: "anonymous".into(),
            permissions: default_permissions(),
        }
    }

    /// Whether this identity holds a permission (exact or wildcard grant).
    pub fn has_permission(&self, required: &str) -> bool {
        matcher::permission_granted(&self.permissions, required)
    }
}

/// An issued token record.
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// Opaque token value.
    pub token: String,
    /// Owning client.
    pub client_id: String,
    /// Granted permissions.
    pub permissions: Vec<String>,
    /// Expiry, if any. Checked lazily at validation time.
    pub expires_at: Option<DateTime<Utc>>,
}

/// External auth source consulted after all local sources miss.
#[async_trait]
pub trait GatewayAuth: Send + Sync {
    /// Return an identity when the gateway recognizes the token.
    async fn validate(&self, token: &str) -> Option<AuthIdentity>;
}

/// Extract a token from an authorization header value.
///
/// Any `Bearer ` prefix is stripped case-insensitively; otherwise the trimmed
/// raw value is the token. Empty input yields no token.
pub fn extract_bearer_token(header: Option<&str>) -> Option<String> {
    let trimmed = header?.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some((scheme, rest)) = trimmed.split_once(char::is_whitespace) {
        if scheme.eq_ignore_ascii_case("bearer") {
            let token = rest.trim();
            return if token.is_empty() {
                None
            } else {
                Some(token.to_string())
            };
        }
    }

    Some(trimmed.to_string())
}

/// Token validator and issuer.
pub struct Authenticator {
    config: AuthConfig,
    issued: Mutex<HashMap<String, AuthToken>>,
    gateway: Option<Arc<dyn GatewayAuth>>,
    audit: Arc<AuditLog>,
}

impl Authenticator {
    /// Create an authenticator for the given configuration.
    pub fn new(config: AuthConfig, audit: Arc<AuditLog>) -> Self {
        Self {
            config,
            issued: Mutex::new(HashMap::new()),
            gateway: None,
            audit,
        }
    }

    /// Attach a gateway auth delegate.
    pub fn with_gateway(mut self, gateway: Arc<dyn GatewayAuth>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Validate a token, returning the caller's identity.
    pub async fn validate(&self, token: &str) -> Result<AuthIdentity> {
        if self.config.mode == AuthMode::None {
            return Ok(AuthIdentity::anonymous());
        }

        if let Some(ref configured) = self.config.token {
            if token == configured {
                self.audit.record(
                    "auth_success",
                    json!({"method": "token", "client_id": "configured"}),
                );
                return Ok(AuthIdentity {
                    client_id: "configured".into(),
                    permissions: default_permissions(),
                });
            }
        }

        if let Some(ref token_file) = self.config.token_file {
            if let Ok(contents) = std::fs::read_to_string(token_file) {
                if token == contents.trim() {
                    self.audit.record(
                        "auth_success",
                        json!({"method": "token_file", "client_id": "configured"}),
                    );
                    return Ok(AuthIdentity {
                        client_id: "configured".into(),
                        permissions: default_permissions(),
                    });
                }
            }
        }

        match self.lookup_issued(token) {
            IssuedLookup::Valid(identity) => {
                self.audit.record(
                    "auth_success",
                    json!({"method": "stored_token", "client_id": identity.client_id}),
                );
                return Ok(identity);
            }
            IssuedLookup::Expired => {
                self.audit
                    .record("auth_failed", json!({"reason": "token_expired"}));
                return Err(Error::Authentication("token has expired".into()));
            }
            IssuedLookup::Miss => {}
        }

        if self.config.use_gateway {
            if let Some(ref gateway) = self.gateway {
                if let Some(identity) = gateway.validate(token).await {
                    self.audit.record(
                        "auth_success",
                        json!({"method": "gateway", "client_id": identity.client_id}),
                    );
                    return Ok(identity);
                }
            }
        }

        self.audit
            .record("auth_failed", json!({"reason": "invalid_token"}));
        Err(Error::Authentication("invalid token".into()))
    }

    /// Issue a token for a client.
    ///
    /// Token values are v4 UUIDs from the OS entropy source. Before exposing
    /// issuance to untrusted callers, bind it to a dedicated credential store
    /// rather than this in-memory map.
    pub fn issue(
        &self,
        client_id: &str,
        permissions: Option<Vec<String>>,
        expires_in_minutes: Option<i64>,
    ) -> String {
        let token = format!("mcp_{}", uuid::Uuid::new_v4().simple());
        let record = AuthToken {
            token: token.clone(),
            client_id: client_id.to_string(),
            permissions: permissions.unwrap_or_else(default_permissions),
            expires_at: expires_in_minutes.map(|m| Utc::now() + Duration::minutes(m)),
        };

        if let Ok(mut issued) = self.issued.lock() {
            issued.insert(token.clone(), record);
        }

        self.audit.record(
            "token_created",
            json!({
                "client_id": client_id,
                "has_expiry": expires_in_minutes.is_some(),
            }),
        );

        token
    }

    /// Revoke a token by value. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        let removed = self
            .issued
            .lock()
            .ok()
            .and_then(|mut issued| issued.remove(token));

        match removed {
            Some(record) => {
                self.audit
                    .record("token_revoked", json!({"client_id": record.client_id}));
                true
            }
            None => false,
        }
    }

    /// Revoke every token issued to a client. Returns the count removed.
    pub fn revoke_client(&self, client_id: &str) -> usize {
        let count = match self.issued.lock() {
            Ok(mut issued) => {
                let before = issued.len();
                issued.retain(|_, record| record.client_id != client_id);
                before - issued.len()
            }
            Err(_) => 0,
        };

        if count > 0 {
            self.audit.record(
                "client_tokens_revoked",
                json!({"client_id": client_id, "count": count}),
            );
        }
        count
    }

    fn lookup_issued(&self, token: &str) -> IssuedLookup {
        let Ok(mut issued) = self.issued.lock() else {
            return IssuedLookup::Miss;
        };
        let Some(record) = issued.get(token) else {
            return IssuedLookup::Miss;
        };

        if let Some(expires_at) = record.expires_at {
            if expires_at < Utc::now() {
                // Expired entries are evicted on read, not swept.
                issued.remove(token);
                return IssuedLookup::Expired;
            }
        }

        IssuedLookup::Valid(AuthIdentity {
            client_id: record.client_id.clone(),
            permissions: record.permissions.clone(),
        })
    }
}

enum IssuedLookup {
    Valid(AuthIdentity),
    Expired,
    Miss,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(mode: AuthMode) -> Authenticator {
        let config = AuthConfig {
            mode,
            token: None,
            token_file: None,
            use_gateway: false,
        };
        Authenticator::new(config, Arc::new(AuditLog::in_memory(true)))
    }

    #[test]
    fn bearer_prefix_is_stripped_case_insensitively() {
        assert_eq!(
            extract_bearer_token(Some("Bearer abc123")),
            Some("abc123".into())
        );
        assert_eq!(
            extract_bearer_token(Some("bearer abc123")),
            Some("abc123".into())
        );
        assert_eq!(
            extract_bearer_token(Some("  BEARER   abc123  ")),
            Some("abc123".into())
        );
    }

    #[test]
    fn raw_token_passes_through() {
        assert_eq!(
            extract_bearer_token(Some("  mcp_rawtoken ")),
            Some("mcp_rawtoken".into())
        );
    }

    #[test]
    fn empty_header_yields_no_token() {
        assert_eq!(extract_bearer_token(None), None);
        assert_eq!(extract_bearer_token(Some("")), None);
        assert_eq!(extract_bearer_token(Some("   ")), None);
        assert_eq!(extract_bearer_token(Some("Bearer   ")), None);
    }

    #[tokio::test]
    async fn disabled_auth_accepts_anything_as_anonymous() {
        let auth = authenticator(AuthMode::None);
        let identity = auth.validate("whatever").await.unwrap();
        assert_eq!(identity.client_id, "anonymous");
        assert!(identity.has_permission("browser.navigate"));
    }

    #[tokio::test]
    async fn static_token_matches() {
        let config = AuthConfig {
            mode: AuthMode::Token,
            token: Some("secret".into()),
            token_file: None,
            use_gateway: false,
        };
        let auth = Authenticator::new(config, Arc::new(AuditLog::in_memory(true)));

        assert!(auth.validate("secret").await.is_ok());
        assert!(auth.validate("wrong").await.is_err());
    }

    #[tokio::test]
    async fn token_file_matches_trimmed_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "filetoken\n").unwrap();

        let config = AuthConfig {
            mode: AuthMode::Token,
            token: None,
            token_file: Some(path),
            use_gateway: false,
        };
        let auth = Authenticator::new(config, Arc::new(AuditLog::in_memory(true)));

        assert!(auth.validate("filetoken").await.is_ok());
        assert!(auth.validate("other").await.is_err());
    }

    #[tokio::test]
    async fn issued_token_lifecycle() {
        let auth = authenticator(AuthMode::Token);

        let token = auth.issue("client-1", None, None);
        assert!(token.starts_with("mcp_"));

        let identity = auth.validate(&token).await.unwrap();
        assert_eq!(identity.client_id, "client-1");

        assert!(auth.revoke(&token));
        assert!(auth.validate(&token).await.is_err());
        assert!(!auth.revoke(&token));
    }

    #[tokio::test]
    async fn expired_token_is_evicted_on_read() {
        let auth = authenticator(AuthMode::Token);

        // Already expired.
        let token = auth.issue("client-1", None, Some(-1));
        match auth.validate(&token).await {
            Err(Error::Authentication(msg)) => assert!(msg.contains("expired")),
            other => panic!("expected expiry failure, got {other:?}"),
        }
        // Evicted: the second attempt is a plain invalid-token failure.
        match auth.validate(&token).await {
            Err(Error::Authentication(msg)) => assert!(msg.contains("invalid")),
            other => panic!("expected invalid token, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_with_ttl_validates_until_expiry() {
        let auth = authenticator(AuthMode::Token);
        let token = auth.issue("client-1", None, Some(1));
        assert!(auth.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_client_removes_all_its_tokens() {
        let auth = authenticator(AuthMode::Token);
        let t1 = auth.issue("client-1", None, None);
        let t2 = auth.issue("client-1", None, None);
        let other = auth.issue("client-2", None, None);

        assert_eq!(auth.revoke_client("client-1"), 2);
        assert!(auth.validate(&t1).await.is_err());
        assert!(auth.validate(&t2).await.is_err());
        assert!(auth.validate(&other).await.is_ok());
    }

    #[tokio::test]
    async fn gateway_is_consulted_last() {
        struct StaticGateway;

        #[async_trait]
        impl GatewayAuth for StaticGateway {
            async fn validate(&self, token: &str) -> Option<AuthIdentity> {
                (token == "gw-token").then(|| AuthIdentity {
                    client_id: "gateway".into(),
                    permissions: default_permissions(),
                })
            }
        }

        let config = AuthConfig {
            mode: AuthMode::Token,
            token: None,
            token_file: None,
            use_gateway: true,
        };
        let auth = Authenticator::new(config, Arc::new(AuditLog::in_memory(true)))
            .with_gateway(Arc::new(StaticGateway));

        let identity = auth.validate("gw-token").await.unwrap();
        assert_eq!(identity.client_id, "gateway");
        assert!(auth.validate("unknown").await.is_err());
    }

    #[test]
    fn issued_permissions_respected() {
        let identity = AuthIdentity {
            client_id: "c".into(),
            permissions: vec!["browser.navigate".into()],
        };
        assert!(identity.has_permission("browser.navigate"));
        assert!(!identity.has_permission("browser.evaluate"));
    }
}
