//! Append-only audit trail for security-relevant decisions.
//!
//! Events land in a bounded in-memory ring for fast recent-event inspection
//! and in a durable newline-delimited JSON file. Recording never fails the
//! caller: file write errors are logged and swallowed, and log reads skip
//! lines that no longer parse.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ring buffer capacity.
const MAX_BUFFER_SIZE: usize = 1000;

/// One recorded security event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Short action tag, e.g. `auth_success`, `tool_call`.
    pub action: String,
    /// Free-form structured detail.
    pub details: serde_json::Value,
}

/// Audit log with an in-memory ring and a durable file.
pub struct AuditLog {
    enabled: bool,
    path: Option<PathBuf>,
    ring: Mutex<VecDeque<AuditEvent>>,
}

impl AuditLog {
    /// Create an audit log writing to `path`. Parent directories are created
    /// best-effort.
    pub fn new(enabled: bool, path: Option<PathBuf>) -> Self {
        if let Some(ref p) = path {
            if let Some(parent) = p.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        Self {
            enabled,
            path,
            ring: Mutex::new(VecDeque::with_capacity(MAX_BUFFER_SIZE)),
        }
    }

    /// In-memory-only log, for tests and disabled configurations.
    pub fn in_memory(enabled: bool) -> Self {
        Self::new(enabled, None)
    }

    /// Record an event. A disabled log drops it.
    pub fn record(&self, action: &str, details: serde_json::Value) {
        if !self.enabled {
            return;
        }

        let event = AuditEvent {
            timestamp: Utc::now(),
            action: action.to_string(),
            details,
        };

        if let Ok(mut ring) = self.ring.lock() {
            if ring.len() >= MAX_BUFFER_SIZE {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        self.append_to_file(&event);
    }

    /// The most recent `count` events from the ring, oldest first.
    pub fn recent(&self, count: usize) -> Vec<AuditEvent> {
        match self.ring.lock() {
            Ok(ring) => {
                let skip = ring.len().saturating_sub(count);
                ring.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Read all events from the durable file, skipping unparsable lines.
    pub fn read_log(&self) -> Vec<AuditEvent> {
        let Some(ref path) = self.path else {
            return Vec::new();
        };
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Drop the durable file and the in-memory ring.
    pub fn clear(&self) {
        if let Some(ref path) = self.path {
            let _ = std::fs::remove_file(path);
        }
        if let Ok(mut ring) = self.ring.lock() {
            ring.clear();
        }
    }

    fn append_to_file(&self, event: &AuditEvent) {
        let Some(ref path) = self.path else {
            return;
        };
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            tracing::debug!("audit file write failed: {e}");
        }
    }
}
