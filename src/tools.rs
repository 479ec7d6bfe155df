//! Tool definitions and registry for the MCP server.
//!
//! Eight browser tools are exposed: navigate, screenshot, click, fill,
//! snapshot, scroll, evaluate, and close. Handlers stay thin: they parse
//! arguments, enforce URL/script policy, resolve the browser target (going
//! through the session manager when a session id is supplied), and delegate
//! the actual automation to the [`BrowserDriver`] seam.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::McpConfig;
use crate::driver::{BrowserDriver, PageTarget, ScrollDirection, WaitUntil};
use crate::error::{Error, Result};
use crate::protocol::{ContentItem, ToolCallResult, ToolDefinition};
use crate::security::{AuditLog, ScriptPolicy, UrlPolicy};
use crate::session::{CreateSessionOptions, SessionManager};

/// Tool trait for implementing MCP tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Permission a caller must hold to invoke this tool.
    fn required_permission(&self) -> Option<&'static str> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult>;
}

/// Registry of available tools. Name collisions are rejected; unregistering
/// an absent tool is a no-op.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.definition().name;
        let mut tools = self.tools.write().expect("registry lock");
        if tools.contains_key(&name) {
            return Err(Error::ToolAlreadyRegistered(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Remove a tool by name. Silently ignores unknown names.
    pub fn unregister(&self, name: &str) {
        self.tools.write().expect("registry lock").remove(name);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().expect("registry lock").get(name).cloned()
    }

    /// All tool definitions.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .expect("registry lock")
            .values()
            .map(|t| t.definition())
            .collect()
    }
}

/// Shared state the browser tools close over.
pub struct ToolContext {
    /// Browser automation backend.
    pub driver: Arc<dyn BrowserDriver>,
    /// Session table.
    pub sessions: Arc<SessionManager>,
    /// URL policy.
    pub url_policy: UrlPolicy,
    /// Script screening policy.
    pub script_policy: ScriptPolicy,
    /// Audit trail.
    pub audit: Arc<AuditLog>,
    /// Server configuration.
    pub config: Arc<McpConfig>,
}

impl ToolContext {
    /// Resolve the browser target for a call.
    ///
    /// A supplied session id goes through the ownership check and binds the
    /// call to that session's endpoint and target; otherwise the endpoint
    /// resolves from the explicit argument, the environment, then config.
    async fn resolve_target(
        &self,
        session_id: Option<&str>,
        client_id: &str,
        cdp_url: Option<&str>,
        target_id: Option<String>,
    ) -> Result<PageTarget> {
        if let Some(session_id) = session_id {
            let session = self.sessions.access(session_id, client_id).await?;
            let cdp_url = session
                .cdp_url
                .clone()
                .or_else(|| self.config.resolve_cdp_url(cdp_url))
                .ok_or_else(|| Error::Internal(no_endpoint_message()))?;
            return Ok(PageTarget {
                cdp_url,
                target_id: session.target_id.clone().or(target_id),
            });
        }

        let cdp_url = self
            .config
            .resolve_cdp_url(cdp_url)
            .ok_or_else(|| Error::Internal(no_endpoint_message()))?;
        Ok(PageTarget { cdp_url, target_id })
    }

    /// Acquire a session for a navigation: reuse the caller's most recently
    /// active private session, or create one bound to the endpoint.
    async fn acquire_session(
        &self,
        client_id: &str,
        cdp_url: &str,
        target_id: Option<String>,
    ) -> Result<crate::session::Session> {
        let existing = self
            .sessions
            .list()
            .await
            .into_iter()
            .filter(|s| s.client_id == client_id && !s.shared)
            .max_by_key(|s| s.last_activity);
        if let Some(session) = existing {
            return self.sessions.access(&session.id, client_id).await;
        }

        self.sessions
            .create(CreateSessionOptions {
                client_id: client_id.to_string(),
                shared: false,
                cdp_url: Some(cdp_url.to_string()),
                target_id,
                metadata: None,
            })
            .await
    }
}

fn no_endpoint_message() -> String {
    "no browser CDP URL available; start a browser instance first".into()
}

fn default_client_id() -> String {
    "anonymous".into()
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: serde_json::Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| Error::InvalidParams(e.to_string()))
}

/// Register the eight browser tools, each wrapped by `wrap`.
pub fn register_browser_tools(
    registry: &ToolRegistry,
    context: &Arc<ToolContext>,
    mut wrap: impl FnMut(Arc<dyn Tool>) -> Arc<dyn Tool>,
) -> Result<()> {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(NavigateTool(Arc::clone(context))),
        Arc::new(ScreenshotTool(Arc::clone(context))),
        Arc::new(ClickTool(Arc::clone(context))),
        Arc::new(FillTool(Arc::clone(context))),
        Arc::new(SnapshotTool(Arc::clone(context))),
        Arc::new(ScrollTool(Arc::clone(context))),
        Arc::new(EvaluateTool(Arc::clone(context))),
        Arc::new(CloseTool(Arc::clone(context))),
    ];
    for tool in tools {
        registry.register(wrap(tool))?;
    }
    Ok(())
}

// ============================================================================
// browser.navigate
// ============================================================================

/// Navigate to a URL after policy checks.
pub struct NavigateTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct NavigateArgs {
    url: String,
    #[serde(rename = "waitUntil", default)]
    wait_until: WaitUntil,
    #[serde(default = "default_navigate_timeout")]
    timeout: u64,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "cdpUrl")]
    cdp_url: Option<String>,
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

fn default_navigate_timeout() -> u64 {
    30_000
}

#[async_trait]
impl Tool for NavigateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.navigate".into(),
            description: "Navigate to a URL in the browser. HTTPS is enforced for non-local \
                          hosts and the hostname must pass the allow-list."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to navigate to."
                    },
                    "waitUntil": {
                        "type": "string",
                        "enum": ["load", "domcontentloaded", "networkidle"],
                        "description": "When to consider navigation complete.",
                        "default": "load"
                    },
                    "timeout": {
                        "type": "number",
                        "description": "Maximum navigation time in milliseconds.",
                        "default": 30000,
                        "minimum": 1000,
                        "maximum": 120000
                    },
                    "sessionId": {
                        "type": "string",
                        "description": "Session to navigate in. A session is acquired when omitted."
                    },
                    "cdpUrl": {
                        "type": "string",
                        "description": "Optional CDP WebSocket URL for the browser instance."
                    },
                    "targetId": {
                        "type": "string",
                        "description": "Optional target (tab) to navigate in."
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.navigate")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: NavigateArgs = parse_args(arguments)?;

        let url = ctx
            .url_policy
            .validate(&args.url)
            .map_err(|e| Error::InvalidParams(format!("invalid URL: {e}")))?;
        if !ctx.url_policy.allowlisted(&url) {
            ctx.audit
                .record("navigate_blocked", json!({"url": args.url}));
            return Err(Error::Authorization(format!(
                "URL is not in the allowed list: {url}"
            )));
        }

        let session = match args.session_id.as_deref() {
            Some(session_id) => ctx.sessions.access(session_id, &args.client_id).await?,
            None => {
                let cdp_url = ctx
                    .config
                    .resolve_cdp_url(args.cdp_url.as_deref())
                    .ok_or_else(|| Error::Internal(no_endpoint_message()))?;
                ctx.acquire_session(&args.client_id, &cdp_url, args.target_id.clone())
                    .await?
            }
        };
        let cdp_url = session
            .cdp_url
            .clone()
            .or_else(|| ctx.config.resolve_cdp_url(args.cdp_url.as_deref()))
            .ok_or_else(|| Error::Internal(no_endpoint_message()))?;
        let target = PageTarget {
            cdp_url,
            target_id: session.target_id.clone().or(args.target_id),
        };

        let info = ctx
            .driver
            .navigate(&target, url.as_str(), args.wait_until, args.timeout)
            .await
            .map_err(|e| Error::ToolExecution(format!("navigation failed: {e}")))?;

        Ok(ToolCallResult::text(format!(
            "Successfully navigated to: {} (session {})",
            info.url, session.id
        )))
    }
}

// ============================================================================
// browser.screenshot
// ============================================================================

/// Capture a screenshot of the page or a selected element.
pub struct ScreenshotTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct ScreenshotArgs {
    selector: Option<String>,
    #[serde(rename = "fullPage", default)]
    full_page: bool,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "cdpUrl")]
    cdp_url: Option<String>,
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

#[async_trait]
impl Tool for ScreenshotTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.screenshot".into(),
            description: "Capture a screenshot of the current page, optionally restricted to \
                          a selector."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "CSS selector limiting the capture to one element."
                    },
                    "fullPage": {
                        "type": "boolean",
                        "description": "Capture the full scrollable page.",
                        "default": false
                    },
                    "sessionId": { "type": "string" },
                    "cdpUrl": { "type": "string" },
                    "targetId": { "type": "string" }
                },
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.screenshot")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: ScreenshotArgs = parse_args(arguments)?;

        let target = ctx
            .resolve_target(
                args.session_id.as_deref(),
                &args.client_id,
                args.cdp_url.as_deref(),
                args.target_id,
            )
            .await?;

        let shot = ctx
            .driver
            .screenshot(&target, args.selector.as_deref(), args.full_page)
            .await
            .map_err(|e| Error::ToolExecution(format!("screenshot failed: {e}")))?;

        Ok(ToolCallResult {
            content: vec![
                ContentItem::image(shot.data, shot.mime_type),
                ContentItem::text("Screenshot captured."),
            ],
            is_error: false,
        })
    }
}

// ============================================================================
// browser.click
// ============================================================================

/// Click an element on the page.
pub struct ClickTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct ClickArgs {
    selector: String,
    #[serde(default = "default_interaction_timeout")]
    timeout: u64,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "cdpUrl")]
    cdp_url: Option<String>,
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

fn default_interaction_timeout() -> u64 {
    30_000
}

#[async_trait]
impl Tool for ClickTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.click".into(),
            description: "Click the element matching a CSS selector.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "CSS selector of the element to click."
                    },
                    "timeout": {
                        "type": "number",
                        "description": "Maximum wait for the element in milliseconds.",
                        "default": 30000
                    },
                    "sessionId": { "type": "string" },
                    "cdpUrl": { "type": "string" },
                    "targetId": { "type": "string" }
                },
                "required": ["selector"],
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.click")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: ClickArgs = parse_args(arguments)?;

        let target = ctx
            .resolve_target(
                args.session_id.as_deref(),
                &args.client_id,
                args.cdp_url.as_deref(),
                args.target_id,
            )
            .await?;

        ctx.driver
            .click(&target, &args.selector, args.timeout)
            .await
            .map_err(|e| Error::ToolExecution(format!("click failed: {e}")))?;

        Ok(ToolCallResult::text(format!(
            "Clicked element: {}",
            args.selector
        )))
    }
}

// ============================================================================
// browser.fill
// ============================================================================

/// Fill an input field.
pub struct FillTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct FillArgs {
    selector: String,
    value: String,
    #[serde(default = "default_interaction_timeout")]
    timeout: u64,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "cdpUrl")]
    cdp_url: Option<String>,
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

#[async_trait]
impl Tool for FillTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.fill".into(),
            description: "Fill the input element matching a CSS selector with a value.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "CSS selector of the input to fill."
                    },
                    "value": {
                        "type": "string",
                        "description": "Value to type into the input."
                    },
                    "timeout": {
                        "type": "number",
                        "default": 30000
                    },
                    "sessionId": { "type": "string" },
                    "cdpUrl": { "type": "string" },
                    "targetId": { "type": "string" }
                },
                "required": ["selector", "value"],
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.fill")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: FillArgs = parse_args(arguments)?;

        let target = ctx
            .resolve_target(
                args.session_id.as_deref(),
                &args.client_id,
                args.cdp_url.as_deref(),
                args.target_id,
            )
            .await?;

        ctx.driver
            .fill(&target, &args.selector, &args.value, args.timeout)
            .await
            .map_err(|e| Error::ToolExecution(format!("fill failed: {e}")))?;

        Ok(ToolCallResult::text(format!(
            "Filled element: {}",
            args.selector
        )))
    }
}

// ============================================================================
// browser.snapshot
// ============================================================================

/// Accessibility-tree snapshot with element references.
pub struct SnapshotTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct SnapshotArgs {
    selector: Option<String>,
    #[serde(rename = "interactiveOnly", default)]
    interactive_only: bool,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "cdpUrl")]
    cdp_url: Option<String>,
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

#[async_trait]
impl Tool for SnapshotTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.snapshot".into(),
            description: "Get an accessibility snapshot of the page with element references."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "CSS selector limiting the snapshot to a subtree."
                    },
                    "interactiveOnly": {
                        "type": "boolean",
                        "description": "Only include interactive elements.",
                        "default": false
                    },
                    "sessionId": { "type": "string" },
                    "cdpUrl": { "type": "string" },
                    "targetId": { "type": "string" }
                },
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.snapshot")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: SnapshotArgs = parse_args(arguments)?;

        let target = ctx
            .resolve_target(
                args.session_id.as_deref(),
                &args.client_id,
                args.cdp_url.as_deref(),
                args.target_id,
            )
            .await?;

        let snapshot = ctx
            .driver
            .snapshot(&target, args.selector.as_deref(), args.interactive_only)
            .await
            .map_err(|e| Error::ToolExecution(format!("snapshot failed: {e}")))?;

        Ok(ToolCallResult::text(snapshot))
    }
}

// ============================================================================
// browser.scroll
// ============================================================================

/// Scroll the page.
pub struct ScrollTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct ScrollArgs {
    direction: ScrollDirection,
    #[serde(default = "default_scroll_pixels")]
    pixels: u32,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "cdpUrl")]
    cdp_url: Option<String>,
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

fn default_scroll_pixels() -> u32 {
    500
}

#[async_trait]
impl Tool for ScrollTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.scroll".into(),
            description: "Scroll the page in a direction.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "direction": {
                        "type": "string",
                        "enum": ["up", "down", "left", "right"],
                        "description": "Scroll direction."
                    },
                    "pixels": {
                        "type": "number",
                        "description": "Distance to scroll in pixels.",
                        "default": 500
                    },
                    "sessionId": { "type": "string" },
                    "cdpUrl": { "type": "string" },
                    "targetId": { "type": "string" }
                },
                "required": ["direction"],
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.scroll")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: ScrollArgs = parse_args(arguments)?;

        let target = ctx
            .resolve_target(
                args.session_id.as_deref(),
                &args.client_id,
                args.cdp_url.as_deref(),
                args.target_id,
            )
            .await?;

        ctx.driver
            .scroll(&target, args.direction, args.pixels)
            .await
            .map_err(|e| Error::ToolExecution(format!("scroll failed: {e}")))?;

        Ok(ToolCallResult::text(format!(
            "Scrolled {:?} by {} pixels",
            args.direction, args.pixels
        )))
    }
}

// ============================================================================
// browser.evaluate
// ============================================================================

/// Evaluate JavaScript after blacklist screening.
pub struct EvaluateTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct EvaluateArgs {
    script: String,
    #[serde(default = "default_evaluate_timeout")]
    timeout: u64,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "cdpUrl")]
    cdp_url: Option<String>,
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

fn default_evaluate_timeout() -> u64 {
    20_000
}

#[async_trait]
impl Tool for EvaluateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.evaluate".into(),
            description: "Evaluate JavaScript in the page. Code is screened against a blocked-\
                          pattern list before it runs; the screening is best-effort, not a \
                          sandbox."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "script": {
                        "type": "string",
                        "description": "JavaScript expression or function body to evaluate."
                    },
                    "timeout": {
                        "type": "number",
                        "description": "Timeout in milliseconds.",
                        "default": 20000
                    },
                    "sessionId": { "type": "string" },
                    "cdpUrl": { "type": "string" },
                    "targetId": { "type": "string" }
                },
                "required": ["script"],
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.evaluate")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: EvaluateArgs = parse_args(arguments)?;

        if args.script.trim().is_empty() {
            return Err(Error::InvalidParams("script is required".into()));
        }

        if let Some(reason) = ctx.script_policy.block_reason(&args.script) {
            ctx.audit.record(
                "evaluate_blocked",
                json!({
                    "reason": reason,
                    "script_preview": args.script.chars().take(100).collect::<String>(),
                }),
            );
            return Err(Error::Authorization(format!(
                "script contains blocked patterns ({reason})"
            )));
        }

        let target = ctx
            .resolve_target(
                args.session_id.as_deref(),
                &args.client_id,
                args.cdp_url.as_deref(),
                args.target_id,
            )
            .await?;

        match ctx.driver.evaluate(&target, &args.script, args.timeout).await {
            Ok(value) => {
                ctx.audit.record(
                    "evaluate_success",
                    json!({"script_length": args.script.len()}),
                );
                let rendered = serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| value.to_string());
                Ok(ToolCallResult::text(rendered))
            }
            Err(e) => {
                ctx.audit.record(
                    "evaluate_error",
                    json!({"error": e.to_string(), "script_length": args.script.len()}),
                );
                Err(Error::ToolExecution(format!("evaluation failed: {e}")))
            }
        }
    }
}

// ============================================================================
// browser.close
// ============================================================================

/// Close a session and its browser target.
pub struct CloseTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct CloseArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "_clientId", default = "default_client_id")]
    client_id: String,
}

#[async_trait]
impl Tool for CloseTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "browser.close".into(),
            description: "Close a browser session and release its resources.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sessionId": {
                        "type": "string",
                        "description": "Session to close."
                    }
                },
                "required": ["sessionId"],
                "additionalProperties": false
            }),
        }
    }

    fn required_permission(&self) -> Option<&'static str> {
        Some("browser.close")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let ctx = &self.0;
        let args: CloseArgs = parse_args(arguments)?;

        let session = ctx.sessions.access(&args.session_id, &args.client_id).await?;

        if let Some(ref cdp_url) = session.cdp_url {
            let target = PageTarget {
                cdp_url: cdp_url.clone(),
                target_id: session.target_id.clone(),
            };
            // Best effort: the session is released even if the browser is gone.
            if let Err(e) = ctx.driver.close_target(&target).await {
                tracing::debug!(session_id = %session.id, "close_target failed: {e}");
            }
        }

        ctx.sessions.release(&session.id).await;
        Ok(ToolCallResult::text(format!(
            "Closed session {}",
            session.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::driver::{DetachedDriver, PageInfo, ScreenshotData};
    use crate::session::SessionManager;

    /// Driver that records nothing and succeeds at everything.
    struct StubDriver;

    #[async_trait]
    impl BrowserDriver for StubDriver {
        async fn navigate(
            &self,
            _target: &PageTarget,
            url: &str,
            _wait_until: WaitUntil,
            _timeout_ms: u64,
        ) -> Result<PageInfo> {
            Ok(PageInfo {
                url: url.to_string(),
                title: Some("Stub Page".into()),
            })
        }

        async fn screenshot(
            &self,
            _target: &PageTarget,
            _selector: Option<&str>,
            _full_page: bool,
        ) -> Result<ScreenshotData> {
            Ok(ScreenshotData {
                data: "aGVsbG8=".into(),
                mime_type: "image/png".into(),
            })
        }

        async fn click(&self, _t: &PageTarget, _s: &str, _timeout_ms: u64) -> Result<()> {
            Ok(())
        }

        async fn fill(&self, _t: &PageTarget, _s: &str, _v: &str, _timeout_ms: u64) -> Result<()> {
            Ok(())
        }

        async fn snapshot(
            &self,
            _t: &PageTarget,
            _selector: Option<&str>,
            _interactive_only: bool,
        ) -> Result<String> {
            Ok("- document\n  - button \"Submit\" @e1".into())
        }

        async fn scroll(
            &self,
            _t: &PageTarget,
            _d: ScrollDirection,
            _pixels: u32,
        ) -> Result<()> {
            Ok(())
        }

        async fn evaluate(
            &self,
            _t: &PageTarget,
            _script: &str,
            _timeout_ms: u64,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!(3))
        }

        async fn close_target(&self, _t: &PageTarget) -> Result<()> {
            Ok(())
        }
    }

    fn context_with(driver: Arc<dyn BrowserDriver>) -> Arc<ToolContext> {
        let mut config = McpConfig::default();
        config.browser.cdp_url = Some("ws://localhost:9222".into());
        config.security.url_allowlist = vec!["*.allowed.com".into()];
        config.security.require_https = false;

        Arc::new(ToolContext {
            driver,
            sessions: Arc::new(SessionManager::new(&SessionConfig::default())),
            url_policy: UrlPolicy::from_config(&config.security),
            script_policy: ScriptPolicy::default(),
            audit: Arc::new(AuditLog::in_memory(true)),
            config: Arc::new(config),
        })
    }

    fn context() -> Arc<ToolContext> {
        context_with(Arc::new(StubDriver))
    }

    #[tokio::test]
    async fn navigate_acquires_and_reuses_a_session() {
        let ctx = context();
        let tool = NavigateTool(Arc::clone(&ctx));

        let result = tool
            .execute(json!({"url": "https://sub.allowed.com/page"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(ctx.sessions.stats().await.total, 1);

        // A second navigation reuses the session instead of creating one.
        tool.execute(json!({"url": "https://allowed.com/other"}))
            .await
            .unwrap();
        assert_eq!(ctx.sessions.stats().await.total, 1);
    }

    #[tokio::test]
    async fn navigate_rejects_disallowed_and_dangerous_urls() {
        let ctx = context();
        let tool = NavigateTool(Arc::clone(&ctx));

        assert!(matches!(
            tool.execute(json!({"url": "https://denied.com/"})).await,
            Err(Error::Authorization(_))
        ));
        assert!(matches!(
            tool.execute(json!({"url": "javascript:alert(1)"})).await,
            Err(Error::InvalidParams(_))
        ));
        // Both denials leave no session behind.
        assert_eq!(ctx.sessions.stats().await.total, 0);
    }

    #[tokio::test]
    async fn navigate_respects_session_ownership() {
        let ctx = context();
        let tool = NavigateTool(Arc::clone(&ctx));

        let result = tool
            .execute(json!({"url": "https://allowed.com/", "_clientId": "owner"}))
            .await
            .unwrap();
        let text = match &result.content[0] {
            ContentItem::Text { text } => text.clone(),
            other => panic!("expected text, got {other:?}"),
        };
        let session_id = text.rsplit("session ").next().unwrap().trim_end_matches(')');

        let denied = tool
            .execute(json!({
                "url": "https://allowed.com/",
                "sessionId": session_id,
                "_clientId": "intruder"
            }))
            .await;
        assert!(matches!(denied, Err(Error::SessionAccessDenied(_))));
    }

    #[tokio::test]
    async fn evaluate_blocks_dangerous_scripts_and_audits() {
        let ctx = context();
        let tool = EvaluateTool(Arc::clone(&ctx));

        let denied = tool.execute(json!({"script": "eval('x')"})).await;
        assert!(matches!(denied, Err(Error::Authorization(_))));

        let events = ctx.audit.recent(10);
        assert!(events.iter().any(|e| e.action == "evaluate_blocked"));
    }

    #[tokio::test]
    async fn evaluate_allows_plain_expressions() {
        let ctx = context();
        let tool = EvaluateTool(Arc::clone(&ctx));

        let result = tool.execute(json!({"script": "1+2"})).await.unwrap();
        assert!(!result.is_error);
        match &result.content[0] {
            ContentItem::Text { text } => assert_eq!(text, "3"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_releases_the_session() {
        let ctx = context();
        let navigate = NavigateTool(Arc::clone(&ctx));
        navigate
            .execute(json!({"url": "https://allowed.com/"}))
            .await
            .unwrap();
        let session_id = ctx.sessions.list().await[0].id.clone();

        let close = CloseTool(Arc::clone(&ctx));
        close
            .execute(json!({"sessionId": session_id}))
            .await
            .unwrap();
        assert_eq!(ctx.sessions.stats().await.total, 0);
    }

    #[tokio::test]
    async fn missing_endpoint_is_a_descriptive_failure() {
        let ctx = {
            let config = McpConfig::default();
            Arc::new(ToolContext {
                driver: Arc::new(StubDriver),
                sessions: Arc::new(SessionManager::new(&SessionConfig::default())),
                url_policy: UrlPolicy::permissive(),
                script_policy: ScriptPolicy::default(),
                audit: Arc::new(AuditLog::in_memory(true)),
                config: Arc::new(config),
            })
        };
        let tool = ClickTool(Arc::clone(&ctx));

        match tool.execute(json!({"selector": "#go"})).await {
            Err(Error::Internal(msg)) => assert!(msg.contains("CDP URL")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detached_driver_surfaces_as_tool_execution_error() {
        let ctx = context_with(Arc::new(DetachedDriver));
        let tool = ClickTool(Arc::clone(&ctx));

        match tool.execute(json!({"selector": "#go"})).await {
            Err(Error::ToolExecution(msg)) => assert!(msg.contains("click failed")),
            other => panic!("expected tool execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_and_scroll_round_trip() {
        let ctx = context();

        let snap = SnapshotTool(Arc::clone(&ctx))
            .execute(json!({"interactiveOnly": true}))
            .await
            .unwrap();
        match &snap.content[0] {
            ContentItem::Text { text } => assert!(text.contains("@e1")),
            other => panic!("expected text, got {other:?}"),
        }

        let scroll = ScrollTool(Arc::clone(&ctx))
            .execute(json!({"direction": "down", "pixels": 250}))
            .await
            .unwrap();
        assert!(!scroll.is_error);
    }

    #[tokio::test]
    async fn screenshot_returns_image_content() {
        let ctx = context();
        let result = ScreenshotTool(Arc::clone(&ctx))
            .execute(json!({}))
            .await
            .unwrap();
        assert!(matches!(result.content[0], ContentItem::Image { .. }));
    }
}
