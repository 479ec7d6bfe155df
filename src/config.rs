//! Server configuration.
//!
//! Defaults merged with an optional JSON config file. The file path resolves
//! from the `MCP_CONFIG_PATH` environment variable, then `./mcp.config.json`,
//! then `<config dir>/browsergate/mcp.json`. An unreadable or malformed file
//! logs a warning and falls back to defaults rather than aborting startup.
//!
//! Per-call values resolve as: explicit argument, then environment variable,
//! then configuration file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Environment variable overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "MCP_CONFIG_PATH";
/// Environment variable carrying the browser endpoint.
pub const CDP_URL_ENV: &str = "BROWSER_CDP_URL";
/// Environment variable carrying the auth token.
pub const AUTH_TOKEN_ENV: &str = "MCP_AUTH_TOKEN";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Server identity overrides.
    pub server: ServerConfig,
    /// Transport selection.
    pub transport: TransportConfig,
    /// Security policy thresholds.
    pub security: SecurityConfig,
    /// Session limits.
    pub sessions: SessionConfig,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Browser backend settings.
    pub browser: BrowserConfig,
}

/// Server identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Advertised server name.
    pub name: String,
    /// Advertised server version.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "browsergate-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Transport selection. Only stdio is bound by this binary; the HTTP variant
/// is representable for forward compatibility but refused at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport kind.
    pub kind: TransportKind,
    /// Listen port (HTTP only).
    pub port: Option<u16>,
    /// Listen host (HTTP only).
    pub host: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            port: None,
            host: None,
        }
    }
}

/// Supported transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON over stdin/stdout.
    Stdio,
    /// HTTP (not bound by this binary).
    Http,
}

/// Security policy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Hostname allow-list patterns (exact or `*.domain`). Empty permits any
    /// non-dangerous URL.
    pub url_allowlist: Vec<String>,
    /// Require HTTPS for non-local URLs.
    pub require_https: bool,
    /// Treat private-range IPs as blocked rather than HTTPS-exempt.
    pub block_private_ips: bool,
    /// Regex patterns blocking submitted scripts. Empty selects the built-in
    /// default set.
    pub blocked_script_patterns: Vec<String>,
    /// Whether audit logging is enabled.
    pub audit_logging: bool,
    /// Audit log file path override.
    pub audit_log_path: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            url_allowlist: vec![
                "*.example.com".into(),
                "localhost".into(),
                "127.0.0.1".into(),
            ],
            require_https: true,
            block_private_ips: false,
            blocked_script_patterns: Vec::new(),
            audit_logging: true,
            audit_log_path: None,
        }
    }
}

/// Session manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum concurrent sessions across all clients.
    pub max_concurrent: usize,
    /// Maximum sessions per client.
    pub max_per_client: usize,
    /// Idle timeout in minutes.
    pub timeout_minutes: u64,
    /// Whether clients may create shared sessions.
    pub allow_shared: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_per_client: 3,
            timeout_minutes: 30,
            allow_shared: false,
        }
    }
}

/// Authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Authentication disabled; callers are anonymous.
    #[default]
    None,
    /// Token required.
    Token,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Authentication mode.
    pub mode: AuthMode,
    /// Static pre-shared token.
    pub token: Option<String>,
    /// Path to a file whose trimmed contents are the accepted token.
    pub token_file: Option<PathBuf>,
    /// Whether to delegate unknown tokens to a gateway auth source.
    pub use_gateway: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            token: None,
            token_file: None,
            use_gateway: true,
        }
    }
}

/// Browser backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Default CDP endpoint for browser connections.
    pub cdp_url: Option<String>,
}

impl McpConfig {
    /// Resolve the config file path.
    pub fn resolve_path() -> PathBuf {
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            if !env_path.trim().is_empty() {
                return PathBuf::from(env_path);
            }
        }

        let project = PathBuf::from("mcp.config.json");
        if project.exists() {
            return project;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("browsergate").join("mcp.json");
            if user.exists() {
                return user;
            }
        }

        project
    }

    /// Load configuration from the resolved path, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&Self::resolve_path())
    }

    /// Load configuration from an explicit path, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("failed to parse config {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Resolve the browser endpoint: explicit argument, environment, config.
    pub fn resolve_cdp_url(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(url) = explicit {
            if !url.trim().is_empty() {
                return Some(url.to_string());
            }
        }
        if let Ok(url) = std::env::var(CDP_URL_ENV) {
            if !url.trim().is_empty() {
                return Some(url);
            }
        }
        self.browser.cdp_url.clone()
    }

    /// Resolve the caller's auth token: explicit argument, environment, config.
    pub fn resolve_auth_token(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(token) = explicit {
            if !token.trim().is_empty() {
                return Some(token.to_string());
            }
        }
        if let Ok(token) = std::env::var(AUTH_TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Some(token);
            }
        }
        self.auth.token.clone()
    }

    /// Audit log file location (configured path or the default under the
    /// user's config directory).
    pub fn audit_log_path(&self) -> PathBuf {
        if let Some(ref path) = self.security.audit_log_path {
            return path.clone();
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("browsergate")
            .join("logs")
            .join("mcp-audit.log")
    }

    /// Session idle timeout as a duration.
    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sessions.timeout_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_policy() {
        let config = McpConfig::default();
        assert!(config.security.require_https);
        assert!(!config.security.block_private_ips);
        assert!(config.security.audit_logging);
        assert_eq!(config.sessions.max_concurrent, 10);
        assert_eq!(config.sessions.max_per_client, 3);
        assert_eq!(config.sessions.timeout_minutes, 30);
        assert!(!config.sessions.allow_shared);
        assert_eq!(config.auth.mode, AuthMode::None);
        assert_eq!(config.transport.kind, TransportKind::Stdio);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "sessions": {{ "max_per_client": 5 }},
                "auth": {{ "mode": "token", "token": "secret" }}
            }}"#
        )
        .unwrap();

        let config = McpConfig::load_from(file.path());
        assert_eq!(config.sessions.max_per_client, 5);
        // Untouched fields keep their defaults.
        assert_eq!(config.sessions.max_concurrent, 10);
        assert_eq!(config.auth.mode, AuthMode::Token);
        assert_eq!(config.auth.token.as_deref(), Some("secret"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();

        let config = McpConfig::load_from(file.path());
        assert_eq!(config.sessions.max_concurrent, 10);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = McpConfig::load_from(Path::new("/nonexistent/mcp.json"));
        assert_eq!(config.sessions.max_per_client, 3);
    }

    #[test]
    fn explicit_cdp_url_wins_over_config() {
        let mut config = McpConfig::default();
        config.browser.cdp_url = Some("ws://config:9222".into());
        assert_eq!(
            config.resolve_cdp_url(Some("ws://explicit:9222")).as_deref(),
            Some("ws://explicit:9222")
        );
        assert_eq!(
            config.resolve_cdp_url(None).as_deref(),
            Some("ws://config:9222")
        );
    }
}
