//! Error types for the MCP server.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// MCP server errors.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON-RPC protocol error with an explicit code.
    #[error("JSON-RPC error: {code} - {message}")]
    JsonRpc {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
        /// Additional data.
        data: Option<serde_json::Value>,
    },

    /// Protocol request was malformed (bad version, bad envelope).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A `tools/*` request arrived before a successful `initialize`.
    #[error("server not initialized")]
    NotInitialized,

    /// Tool not found in the registry.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    ToolAlreadyRegistered(String),

    /// Invalid parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Tool handler failed while executing.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but belongs to another client.
    #[error("session access denied: {0}")]
    SessionAccessDenied(String),

    /// A session limit was hit; the message names the exceeded limit.
    #[error("session limit exceeded: {0}")]
    SessionLimit(String),

    /// Caller could not be authenticated.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Caller is authenticated but not permitted to do this.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Transport is closed or the underlying stream failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::JsonRpc { code, .. } => *code,
            Error::InvalidRequest(_) => codes::INVALID_REQUEST,
            Error::NotInitialized => codes::SERVER_NOT_INITIALIZED,
            Error::ToolNotFound(_) => codes::TOOL_NOT_FOUND,
            Error::ToolAlreadyRegistered(_) => codes::RESOURCE_ALREADY_EXISTS,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::ToolExecution(_) => codes::TOOL_EXECUTION_ERROR,
            Error::SessionNotFound(_) => codes::SESSION_NOT_FOUND,
            Error::SessionAccessDenied(_) => codes::AUTHORIZATION_ERROR,
            Error::SessionLimit(_) => codes::RATE_LIMIT_EXCEEDED,
            Error::Authentication(_) => codes::AUTHENTICATION_ERROR,
            Error::Authorization(_) => codes::AUTHORIZATION_ERROR,
            Error::Transport(_) => codes::INTERNAL_ERROR,
            Error::Serialization(_) => codes::PARSE_ERROR,
            Error::Io(_) => codes::INTERNAL_ERROR,
            Error::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_json_rpc_error(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// JSON-RPC error codes, standard and MCP-specific.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Request timed out.
    pub const REQUEST_TIMEOUT: i32 = -32001;
    /// A request arrived before `initialize` succeeded.
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    /// Resource not found.
    pub const RESOURCE_NOT_FOUND: i32 = -32003;
    /// Resource already exists.
    pub const RESOURCE_ALREADY_EXISTS: i32 = -32004;
    /// Named tool is not registered.
    pub const TOOL_NOT_FOUND: i32 = -32005;
    /// Tool handler failed.
    pub const TOOL_EXECUTION_ERROR: i32 = -32006;
    /// Session id does not resolve.
    pub const SESSION_NOT_FOUND: i32 = -32007;
    /// Caller identity could not be established.
    pub const AUTHENTICATION_ERROR: i32 = -32008;
    /// Caller lacks the required permission.
    pub const AUTHORIZATION_ERROR: i32 = -32009;
    /// A concurrency or rate cap was exceeded.
    pub const RATE_LIMIT_EXCEEDED: i32 = -32010;
}
