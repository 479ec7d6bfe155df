//! MCP protocol engine.
//!
//! Owns the handshake state machine, request/notification dispatch, and the
//! tool registry. Every request yields exactly one response; notifications
//! yield none. Tool handler failures are folded into `isError` results so
//! clients can tell "the action failed" apart from "the request was invalid";
//! only protocol violations (bad version, wrong state, unknown method or
//! tool) become JSON-RPC errors. Requests are handled on spawned tasks, so
//! long-running tool calls do not serialize and responses may legitimately
//! complete out of request order — the transport keeps bytes ordered.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{codes, Error, Result};
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcId, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, LogLevel, McpMessage, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolCallResult, PROTOCOL_VERSION,
};
use crate::tools::ToolRegistry;
use crate::transport::{Transport, TransportEvent};

/// MCP protocol engine.
///
/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    server_info: ServerInfo,
    capabilities: ServerCapabilities,
    registry: ToolRegistry,
    initialized: RwLock<bool>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
}

impl McpServer {
    /// Create an engine advertising the given identity.
    pub fn new(server_info: ServerInfo, registry: ToolRegistry) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                server_info,
                capabilities: ServerCapabilities::advertised(),
                registry,
                initialized: RwLock::new(false),
                transport: RwLock::new(None),
            }),
        }
    }

    /// The tool registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// Attach a transport. Fails if one is already attached.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let mut slot = self.inner.transport.write().await;
        if slot.is_some() {
            return Err(Error::Internal(
                "server already connected to a transport".into(),
            ));
        }
        *slot = Some(transport);
        Ok(())
    }

    /// Detach and close the transport, resetting the handshake state.
    pub async fn disconnect(&self) {
        let transport = self.inner.transport.write().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        *self.inner.initialized.write().await = false;
    }

    /// Whether a transport is attached and open.
    pub async fn is_connected(&self) -> bool {
        match *self.inner.transport.read().await {
            Some(ref transport) => !transport.is_closed(),
            None => false,
        }
    }

    /// Whether the handshake has completed.
    pub async fn is_initialized(&self) -> bool {
        *self.inner.initialized.read().await
    }

    /// Drive the attached transport until the peer disconnects.
    pub async fn run(&self) -> Result<()> {
        let transport = self
            .inner
            .transport
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Internal("no transport attached".into()))?;

        while let Some(event) = transport.recv().await {
            match event {
                TransportEvent::Message(message) => self.dispatch(message, &transport),
                TransportEvent::Error(reason) => {
                    // Framing errors drop the message, never the connection.
                    tracing::warn!("transport error: {reason}");
                }
            }
        }

        self.disconnect().await;
        Ok(())
    }

    fn dispatch(&self, message: McpMessage, transport: &Arc<dyn Transport>) {
        match message {
            McpMessage::Request(request) => {
                let engine = self.clone();
                let transport = Arc::clone(transport);
                tokio::spawn(async move {
                    let response = engine.handle_request(request).await;
                    if let Err(e) = transport.send(response.into()).await {
                        tracing::warn!("failed to send response: {e}");
                    }
                });
            }
            McpMessage::Notification(notification) => {
                let engine = self.clone();
                tokio::spawn(async move {
                    engine.handle_notification(notification).await;
                });
            }
            McpMessage::Response(_) => {
                // Clients do not send responses to a server.
            }
        }
    }

    /// Handle one request, producing its single response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params).await,
            "initialized" => JsonRpcResponse::success(id, serde_json::json!({})),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => self.handle_tools_list(id).await,
            "tools/call" => self.handle_tools_call(id, request.params).await,
            _ => JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("method not found: {}", request.method),
            ),
        }
    }

    /// Handle one notification. Never answered; failures are logged only.
    pub async fn handle_notification(&self, notification: JsonRpcRequest) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("client initialized");
            }
            "notifications/cancelled" => {
                // Accepted but ignored: in-flight tool calls cannot be
                // aborted by the client.
                tracing::debug!("cancellation requested; not supported");
            }
            _ => {
                tracing::debug!("ignoring unknown notification: {}", notification.method);
            }
        }
    }

    async fn handle_initialize(
        &self,
        id: Option<JsonRpcId>,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        let params: InitializeParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid initialize params: {e}"),
                );
            }
            None => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    "initialize params required",
                );
            }
        };

        // A version mismatch leaves the connection uninitialized.
        if params.protocol_version != PROTOCOL_VERSION {
            return JsonRpcResponse::error(
                id,
                codes::INVALID_REQUEST,
                format!(
                    "unsupported protocol version: {} (supported: {})",
                    params.protocol_version, PROTOCOL_VERSION
                ),
            );
        }

        *self.inner.initialized.write().await = true;
        tracing::info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            "initialize handshake complete"
        );

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: self.inner.capabilities.clone(),
            server_info: self.inner.server_info.clone(),
        };
        JsonRpcResponse::success(id, result)
    }

    async fn handle_tools_list(&self, id: Option<JsonRpcId>) -> JsonRpcResponse {
        if !self.is_initialized().await {
            return JsonRpcResponse::error(
                id,
                codes::SERVER_NOT_INITIALIZED,
                "server not initialized",
            );
        }

        let result = ListToolsResult {
            tools: self.inner.registry.list(),
        };
        JsonRpcResponse::success(id, result)
    }

    async fn handle_tools_call(
        &self,
        id: Option<JsonRpcId>,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        if !self.is_initialized().await {
            return JsonRpcResponse::error(
                id,
                codes::SERVER_NOT_INITIALIZED,
                "server not initialized",
            );
        }

        let params: ToolCallParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid tool call params: {e}"),
                );
            }
            None => {
                return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "tool call params required");
            }
        };

        let Some(tool) = self.inner.registry.get(&params.name) else {
            return JsonRpcResponse::error(
                id,
                codes::TOOL_NOT_FOUND,
                format!("tool not found: {}", params.name),
            );
        };

        // Handler failures are results, not protocol errors.
        match tool.execute(params.arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::debug!(tool = %params.name, "tool failed: {e}");
                JsonRpcResponse::success(
                    id,
                    ToolCallResult::error_text(format!("tool execution error: {e}")),
                )
            }
        }
    }

    /// Emit a `notifications/message` log entry when connected.
    pub async fn log(&self, level: LogLevel, data: serde_json::Value, logger: Option<&str>) {
        let Some(transport) = self.inner.transport.read().await.clone() else {
            return;
        };
        let notification = JsonRpcNotification::log_message(level, data, logger);
        if let Err(e) = transport.send(notification.into()).await {
            tracing::debug!("failed to send log notification: {e}");
        }
    }

    /// Tell the client the tool catalogue changed, when connected and the
    /// capability was advertised.
    pub async fn notify_tools_list_changed(&self) {
        let advertised = self
            .inner
            .capabilities
            .tools
            .as_ref()
            .is_some_and(|t| t.list_changed);
        if !advertised {
            return;
        }
        let Some(transport) = self.inner.transport.read().await.clone() else {
            return;
        };
        if let Err(e) = transport
            .send(JsonRpcNotification::tools_list_changed().into())
            .await
        {
            tracing::debug!("failed to send list_changed notification: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ContentItem, ToolDefinition};
    use crate::tools::Tool;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the arguments back.".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolCallResult> {
            Ok(ToolCallResult {
                content: vec![ContentItem::text(arguments.to_string())],
                is_error: false,
            })
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "broken".into(),
                description: "Always fails.".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolCallResult> {
            Err(Error::ToolExecution("simulated backend outage".into()))
        }
    }

    fn engine() -> McpServer {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        registry.register(Arc::new(FailingTool)).unwrap();
        McpServer::new(
            ServerInfo {
                name: "test-server".into(),
                version: "0.0.0".into(),
            },
            registry,
        )
    }

    fn request(id: i64, method: &str, params: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(JsonRpcId::Number(id)),
            method: method.into(),
            params,
        }
    }

    fn init_params(version: &str) -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": version,
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "1.0"}
        })
    }

    async fn initialize(server: &McpServer) {
        let response = server
            .handle_request(request(1, "initialize", Some(init_params(PROTOCOL_VERSION))))
            .await;
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn initialize_agrees_on_version_and_identity() {
        let server = engine();
        let response = server
            .handle_request(request(1, "initialize", Some(init_params(PROTOCOL_VERSION))))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test-server");
        assert!(server.is_initialized().await);
    }

    #[tokio::test]
    async fn version_mismatch_leaves_connection_uninitialized() {
        let server = engine();
        let response = server
            .handle_request(request(1, "initialize", Some(init_params("1999-01-01"))))
            .await;

        assert_eq!(response.error.unwrap().code, codes::INVALID_REQUEST);
        assert!(!server.is_initialized().await);

        // tools/* remain gated.
        let listed = server.handle_request(request(2, "tools/list", None)).await;
        assert_eq!(listed.error.unwrap().code, codes::SERVER_NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn tools_requests_require_initialization() {
        let server = engine();

        for method in ["tools/list", "tools/call"] {
            let response = server.handle_request(request(1, method, None)).await;
            assert_eq!(
                response.error.unwrap().code,
                codes::SERVER_NOT_INITIALIZED,
                "{method} should be gated"
            );
        }

        initialize(&server).await;
        let response = server.handle_request(request(2, "tools/list", None)).await;
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn listed_tool_round_trips_its_definition() {
        let server = engine();
        initialize(&server).await;

        let response = server.handle_request(request(2, "tools/list", None)).await;
        let tools = response.result.unwrap()["tools"].clone();
        let echo = tools
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "echo")
            .expect("echo listed");
        assert_eq!(echo["description"], "Echo the arguments back.");
        assert_eq!(echo["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_protocol_error() {
        let server = engine();
        initialize(&server).await;

        let response = server
            .handle_request(request(
                3,
                "tools/call",
                Some(serde_json::json!({"name": "missing", "arguments": {}})),
            ))
            .await;
        assert_eq!(response.error.unwrap().code, codes::TOOL_NOT_FOUND);
    }

    #[tokio::test]
    async fn failing_handler_becomes_is_error_result() {
        let server = engine();
        initialize(&server).await;

        let response = server
            .handle_request(request(
                4,
                "tools/call",
                Some(serde_json::json!({"name": "broken", "arguments": {}})),
            ))
            .await;

        assert!(response.error.is_none(), "must not be a protocol error");
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("simulated backend outage"));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let server = engine();
        let response = server
            .handle_request(request(9, "nonexistent/method", None))
            .await;
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_names() {
        let server = engine();
        assert!(matches!(
            server.registry().register(Arc::new(EchoTool)),
            Err(Error::ToolAlreadyRegistered(_))
        ));

        // Unregister-then-register succeeds.
        server.registry().unregister("echo");
        assert!(server.registry().register(Arc::new(EchoTool)).is_ok());
    }

    #[tokio::test]
    async fn unregister_unknown_tool_is_a_no_op() {
        let server = engine();
        server.registry().unregister("never-existed");
    }
}
