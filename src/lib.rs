//! # browsergate-mcp
//!
//! MCP (Model Context Protocol) server that gates browser automation behind
//! authentication and security policy.
//!
//! This crate implements a standards-compliant MCP server speaking JSON-RPC
//! 2.0 over stdio. It exposes schema-described browser tools (navigate,
//! screenshot, click, fill, snapshot, scroll, evaluate, close) while keeping
//! the hard parts in-crate:
//!
//! - **Transport**: newline-delimited JSON framing with ordered writes;
//!   malformed input is dropped, never fatal
//! - **Protocol engine**: handshake state machine, request/notification
//!   dispatch, tool registry; handler failures become `isError` results, not
//!   protocol errors
//! - **Sessions**: per-client browser session handles with concurrency caps,
//!   ownership checks, and idle expiry
//! - **Security**: URL allow-listing, blocked-script screening, and an
//!   append-only audit log
//! - **Auth**: token extraction/validation/issuance/revocation with wildcard
//!   permission grants
//!
//! The actual browser automation lives behind the [`driver::BrowserDriver`]
//! trait; this crate ships only a detached placeholder binding.
//!
//! ## Usage with an MCP client
//!
//! ```json
//! {
//!   "servers": {
//!     "browsergate": {
//!       "command": "browsergate-mcp",
//!       "args": ["--stdio"],
//!       "env": {}
//!     }
//!   }
//! }
//! ```
//!
//! ## Security model
//!
//! - Dangerous URL schemes are always rejected; hostnames must pass the
//!   configured allow-list and HTTPS policy
//! - Submitted scripts are screened against a blocked-pattern list
//!   (best-effort, documented as defense-in-depth rather than isolation)
//! - Every auth decision, security block, and tool outcome is audit logged

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod driver;
pub mod error;
pub mod matcher;
pub mod protocol;
pub mod security;
pub mod server;
pub mod service;
pub mod session;
pub mod tools;
pub mod transport;

pub use config::McpConfig;
pub use error::{Error, Result};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpMessage};
pub use server::McpServer;
pub use service::{BrowserGateService, ServiceOptions};
pub use session::SessionManager;
pub use tools::{Tool, ToolRegistry};
pub use transport::{NdjsonTransport, Transport};
