//! Browser MCP service: wires the engine, sessions, security, and auth
//! together and gates every tool call.
//!
//! Each registered tool is wrapped so that a call first establishes the
//! caller's identity, then checks the tool's required permission, then runs
//! the handler with the resolved client id injected into its arguments, and
//! finally records the outcome and duration in the audit log.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::auth::{extract_bearer_token, Authenticator, AuthIdentity};
use crate::config::{AuthMode, McpConfig};
use crate::driver::BrowserDriver;
use crate::error::{Error, Result};
use crate::protocol::{ServerInfo, ToolCallResult, ToolDefinition};
use crate::security::{AuditLog, ScriptPolicy, UrlPolicy};
use crate::server::McpServer;
use crate::session::SessionManager;
use crate::tools::{register_browser_tools, Tool, ToolContext, ToolRegistry};
use crate::transport::{NdjsonTransport, Transport};

/// Options for constructing the service.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// Explicit auth token, taking precedence over environment and config.
    pub auth_token: Option<String>,
    /// Explicit browser endpoint, taking precedence over environment and
    /// config.
    pub cdp_url: Option<String>,
}

/// The assembled browser MCP service.
pub struct BrowserGateService {
    engine: McpServer,
    sessions: Arc<SessionManager>,
    audit: Arc<AuditLog>,
    auth: Arc<Authenticator>,
    config: Arc<McpConfig>,
}

impl BrowserGateService {
    /// Build the service around a browser driver.
    pub fn new(
        mut config: McpConfig,
        driver: Arc<dyn BrowserDriver>,
        options: ServiceOptions,
    ) -> Result<Self> {
        if let Some(cdp_url) = options.cdp_url {
            config.browser.cdp_url = Some(cdp_url);
        }

        let audit_path = config.security.audit_logging.then(|| config.audit_log_path());
        let audit = Arc::new(AuditLog::new(config.security.audit_logging, audit_path));
        let auth = Arc::new(Authenticator::new(config.auth.clone(), Arc::clone(&audit)));
        let sessions = Arc::new(SessionManager::new(&config.sessions));
        let config = Arc::new(config);

        let context = Arc::new(ToolContext {
            driver,
            sessions: Arc::clone(&sessions),
            url_policy: UrlPolicy::from_config(&config.security),
            script_policy: ScriptPolicy::from_patterns(&config.security.blocked_script_patterns),
            audit: Arc::clone(&audit),
            config: Arc::clone(&config),
        });

        let registry = ToolRegistry::new();
        register_browser_tools(&registry, &context, |inner| {
            Arc::new(GuardedTool {
                inner,
                auth: Arc::clone(&auth),
                audit: Arc::clone(&audit),
                config: Arc::clone(&config),
                auth_token: options.auth_token.clone(),
            })
        })?;

        let engine = McpServer::new(
            ServerInfo {
                name: config.server.name.clone(),
                version: config.server.version.clone(),
            },
            registry,
        );

        Ok(Self {
            engine,
            sessions,
            audit,
            auth,
            config,
        })
    }

    /// The protocol engine.
    pub fn engine(&self) -> &McpServer {
        &self.engine
    }

    /// The session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The audit log.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// The authenticator (token issuance and revocation).
    pub fn auth(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Serve one connection over the given transport until the peer leaves.
    ///
    /// Starts the session expiry sweeper for the duration of the connection
    /// and releases every remaining session on disconnect.
    pub async fn serve(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.audit.record(
            "server_start",
            json!({
                "name": self.config.server.name,
                "version": self.config.server.version,
            }),
        );

        let sweeper = self.sessions.spawn_sweeper();
        self.engine.connect(transport).await?;
        let result = self.engine.run().await;
        sweeper.abort();

        let released = self.release_all_sessions().await;
        self.audit.record(
            "server_stop",
            json!({"sessions_released": released}),
        );
        result
    }

    /// Serve over the process's standard streams.
    pub async fn run_stdio(&self) -> Result<()> {
        self.serve(Arc::new(NdjsonTransport::stdio())).await
    }

    async fn release_all_sessions(&self) -> usize {
        let stats = self.sessions.stats().await;
        let mut count = 0;
        for client_id in stats.by_client.keys() {
            count += self.sessions.release_client(client_id).await;
        }
        count
    }
}

/// Wraps a tool with authentication, authorization, and audit logging.
struct GuardedTool {
    inner: Arc<dyn Tool>,
    auth: Arc<Authenticator>,
    audit: Arc<AuditLog>,
    config: Arc<McpConfig>,
    auth_token: Option<String>,
}

impl GuardedTool {
    async fn authenticate(&self) -> Result<AuthIdentity> {
        if self.config.auth.mode == AuthMode::None {
            return Ok(AuthIdentity::anonymous());
        }

        let raw = self.config.resolve_auth_token(self.auth_token.as_deref());
        let Some(token) = extract_bearer_token(raw.as_deref()) else {
            return Err(Error::Authentication(
                "authentication token required; set the MCP_AUTH_TOKEN environment variable"
                    .into(),
            ));
        };
        self.auth.validate(&token).await
    }
}

#[async_trait]
impl Tool for GuardedTool {
    fn definition(&self) -> ToolDefinition {
        self.inner.definition()
    }

    fn required_permission(&self) -> Option<&'static str> {
        self.inner.required_permission()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let name = self.inner.definition().name;
        let identity = self.authenticate().await?;

        if let Some(permission) = self.inner.required_permission() {
            if !identity.has_permission(permission) {
                self.audit.record(
                    "permission_denied",
                    json!({
                        "tool": name,
                        "client_id": identity.client_id,
                        "permission": permission,
                    }),
                );
                return Err(Error::Authorization(format!(
                    "permission denied: {permission}"
                )));
            }
        }

        // Hand the resolved identity to the handler through its arguments.
        let mut arguments = arguments;
        if !arguments.is_object() {
            arguments = json!({});
        }
        if let Some(map) = arguments.as_object_mut() {
            map.insert("_clientId".into(), json!(identity.client_id));
        }

        let start = Instant::now();
        let result = self.inner.execute(arguments).await;

        let (success, error) = match &result {
            Ok(r) => (!r.is_error, None),
            Err(e) => (false, Some(e.to_string())),
        };
        self.audit.record(
            "tool_call",
            json!({
                "tool": name,
                "client_id": identity.client_id,
                "success": success,
                "error": error,
                "duration_ms": start.elapsed().as_millis() as u64,
            }),
        );

        result
    }
}
