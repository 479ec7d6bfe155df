//! Pattern screening for client-submitted scripts.
//!
//! This is a blacklist, not isolation: text matching cannot prove the absence
//! of dynamic code paths, so a pass here is defense-in-depth only. Real
//! containment requires a process or VM boundary, which is out of scope for
//! this server.

use regex::{Regex, RegexBuilder};

/// Pattern sources blocked by default, grouped by attack surface.
const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    // Code execution
    r"eval\s*\(",
    r"new\s+Function\s*\(",
    r"Function\s*\(",
    r#"setTimeout\s*\(\s*["'][^"']+["']"#,
    r#"setInterval\s*\(\s*["'][^"']+["']"#,
    // Document rewriting
    r"document\.write",
    r"document\.writeln",
    r"document\.open\s*\(",
    r"document\.execCommand",
    // Window/location manipulation
    r"window\.open\s*\(",
    r"location\.href\s*=",
    r"location\.replace\s*\(",
    r"location\.assign\s*\(",
    // Network requests
    r"XMLHttpRequest",
    r"fetch\s*\(",
    r"WebSocket",
    r"EventSource",
    // Cross-origin communication
    r"postMessage\s*\(",
    // Storage access
    r"localStorage",
    r"sessionStorage",
    r"indexedDB",
    r"webkitIndexedDB",
    r"mozIndexedDB",
    // Worker creation
    r"new\s+Worker",
    r"new\s+SharedWorker",
    r"navigator\.serviceWorker",
    // Clipboard access
    r"navigator\.clipboard",
    // File system access
    r"showOpenFilePicker",
    r"showSaveFilePicker",
    r"showDirectoryPicker",
    // Device APIs
    r"navigator\.mediaDevices",
    r"navigator\.getUserMedia",
    r"navigator\.webkitGetUserMedia",
    r"navigator\.mozGetUserMedia",
    // Known miner strings
    r"CryptoNight",
    r"coinhive",
    r"webminer",
    // iframe injection
    r#"document\.createElement\s*\(\s*["']iframe"#,
    r"appendChild.*iframe",
    // HTML injection sinks
    r"<script",
    r"innerHTML\s*=",
    r"outerHTML\s*=",
    r"insertAdjacentHTML",
];

/// Compiled script screening policy.
#[derive(Debug, Clone)]
pub struct ScriptPolicy {
    patterns: Vec<Regex>,
}

impl ScriptPolicy {
    /// Build from configured pattern sources, or the default set when the
    /// configuration is empty. Invalid user patterns are skipped with a
    /// warning rather than failing startup.
    pub fn from_patterns(configured: &[String]) -> Self {
        let sources: Vec<&str> = if configured.is_empty() {
            DEFAULT_BLOCKED_PATTERNS.to_vec()
        } else {
            configured.iter().map(String::as_str).collect()
        };

        let patterns = sources
            .iter()
            .filter_map(|source| {
                match RegexBuilder::new(source).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!("skipping invalid blocked-script pattern {source:?}: {e}");
                        None
                    }
                }
            })
            .collect();

        Self { patterns }
    }

    /// Whether the script passes screening.
    pub fn is_allowed(&self, script: &str) -> bool {
        self.block_reason(script).is_none()
    }

    /// The first pattern the script trips, if any.
    pub fn block_reason(&self, script: &str) -> Option<String> {
        self.patterns
            .iter()
            .find(|re| re.is_match(script))
            .map(|re| format!("blocked pattern matched: {}", re.as_str()))
    }

    /// Strip comments and replace blocked spans with a placeholder.
    ///
    /// Best effort only — never a safety guarantee.
    pub fn sanitize(&self, script: &str) -> String {
        let line_comments = Regex::new(r"(?m)//.*$").expect("static pattern");
        let block_comments = Regex::new(r"(?s)/\*.*?\*/").expect("static pattern");

        let mut sanitized = line_comments.replace_all(script, "").into_owned();
        sanitized = block_comments.replace_all(&sanitized, "").into_owned();

        for re in &self.patterns {
            sanitized = re.replace_all(&sanitized, "/* blocked */").into_owned();
        }

        sanitized.trim().to_string()
    }
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self::from_patterns(&[])
    }
}
