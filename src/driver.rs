//! Browser backend seam.
//!
//! Tool handlers talk to the browser exclusively through [`BrowserDriver`],
//! so the protocol, session, security, and auth layers never depend on a
//! concrete automation stack. Driver failures surface as tool execution
//! errors, which the engine folds into `isError` results.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Where a browser operation lands: an endpoint plus an optional target (tab).
#[derive(Debug, Clone)]
pub struct PageTarget {
    /// CDP endpoint URL.
    pub cdp_url: String,
    /// Target (tab) id within the endpoint.
    pub target_id: Option<String>,
}

/// When navigation is considered complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// The load event fired.
    #[default]
    Load,
    /// The DOMContentLoaded event fired.
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    /// No network connections for at least 500ms.
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

/// Scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// Toward the top of the document.
    Up,
    /// Toward the bottom of the document.
    Down,
    /// Toward the left edge.
    Left,
    /// Toward the right edge.
    Right,
}

/// Result of a completed navigation.
#[derive(Debug, Clone)]
pub struct PageInfo {
    /// Final URL after redirects.
    pub url: String,
    /// Page title, when available.
    pub title: Option<String>,
}

/// A captured screenshot.
#[derive(Debug, Clone)]
pub struct ScreenshotData {
    /// Base64-encoded image bytes.
    pub data: String,
    /// MIME type of the encoding.
    pub mime_type: String,
}

/// The opaque browser automation backend.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate the target to a URL.
    async fn navigate(
        &self,
        target: &PageTarget,
        url: &str,
        wait_until: WaitUntil,
        timeout_ms: u64,
    ) -> Result<PageInfo>;

    /// Capture a screenshot of the page or a selected element.
    async fn screenshot(
        &self,
        target: &PageTarget,
        selector: Option<&str>,
        full_page: bool,
    ) -> Result<ScreenshotData>;

    /// Click the element matching a selector.
    async fn click(&self, target: &PageTarget, selector: &str, timeout_ms: u64) -> Result<()>;

    /// Fill an input element with a value.
    async fn fill(
        &self,
        target: &PageTarget,
        selector: &str,
        value: &str,
        timeout_ms: u64,
    ) -> Result<()>;

    /// Render an accessibility snapshot of the page.
    async fn snapshot(
        &self,
        target: &PageTarget,
        selector: Option<&str>,
        interactive_only: bool,
    ) -> Result<String>;

    /// Scroll the page.
    async fn scroll(
        &self,
        target: &PageTarget,
        direction: ScrollDirection,
        pixels: u32,
    ) -> Result<()>;

    /// Evaluate a (pre-screened) script in the page, returning its value.
    async fn evaluate(
        &self,
        target: &PageTarget,
        script: &str,
        timeout_ms: u64,
    ) -> Result<serde_json::Value>;

    /// Close the target.
    async fn close_target(&self, target: &PageTarget) -> Result<()>;
}

/// Driver used when no automation stack is wired in.
///
/// Every operation fails with a descriptive error, which clients receive as
/// an `isError` tool result rather than a protocol failure.
pub struct DetachedDriver;

impl DetachedDriver {
    fn unavailable(&self, operation: &str) -> Error {
        Error::ToolExecution(format!(
            "no browser automation backend is attached (operation: {operation})"
        ))
    }
}

#[async_trait]
impl BrowserDriver for DetachedDriver {
    async fn navigate(
        &self,
        _target: &PageTarget,
        _url: &str,
        _wait_until: WaitUntil,
        _timeout_ms: u64,
    ) -> Result<PageInfo> {
        Err(self.unavailable("navigate"))
    }

    async fn screenshot(
        &self,
        _target: &PageTarget,
        _selector: Option<&str>,
        _full_page: bool,
    ) -> Result<ScreenshotData> {
        Err(self.unavailable("screenshot"))
    }

    async fn click(&self, _target: &PageTarget, _selector: &str, _timeout_ms: u64) -> Result<()> {
        Err(self.unavailable("click"))
    }

    async fn fill(
        &self,
        _target: &PageTarget,
        _selector: &str,
        _value: &str,
        _timeout_ms: u64,
    ) -> Result<()> {
        Err(self.unavailable("fill"))
    }

    async fn snapshot(
        &self,
        _target: &PageTarget,
        _selector: Option<&str>,
        _interactive_only: bool,
    ) -> Result<String> {
        Err(self.unavailable("snapshot"))
    }

    async fn scroll(
        &self,
        _target: &PageTarget,
        _direction: ScrollDirection,
        _pixels: u32,
    ) -> Result<()> {
        Err(self.unavailable("scroll"))
    }

    async fn evaluate(
        &self,
        _target: &PageTarget,
        _script: &str,
        _timeout_ms: u64,
    ) -> Result<serde_json::Value> {
        Err(self.unavailable("evaluate"))
    }

    async fn close_target(&self, _target: &PageTarget) -> Result<()> {
        Err(self.unavailable("close"))
    }
}
