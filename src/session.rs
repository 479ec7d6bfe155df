//! Browser session lifecycle, ownership, and limits.
//!
//! Sessions are server-side handles to live browser contexts, indexed both
//! globally and per owning client. Creation is capped per client and
//! globally; any read counts as activity; a periodic sweep releases sessions
//! idle past the configured timeout so abandoned clients cannot pin capacity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::error::{Error, Result};

/// How often the expiry sweep runs.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// A live session handle.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque, unguessable id.
    pub id: String,
    /// Owning client.
    pub client_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last read or access. Monotonically non-decreasing.
    pub last_activity: DateTime<Utc>,
    /// Whether other clients may access this session.
    pub shared: bool,
    /// Browser endpoint this session is bound to.
    pub cdp_url: Option<String>,
    /// Browser target (tab) this session drives.
    pub target_id: Option<String>,
    /// Caller-supplied metadata.
    pub metadata: Option<Value>,
}

/// Options for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    /// Owning client id.
    pub client_id: String,
    /// Request a shared session.
    pub shared: bool,
    /// Browser endpoint to bind.
    pub cdp_url: Option<String>,
    /// Browser target to bind.
    pub target_id: Option<String>,
    /// Caller-supplied metadata.
    pub metadata: Option<Value>,
}

/// Aggregate session statistics.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Total live sessions.
    pub total: usize,
    /// Live shared sessions.
    pub shared: usize,
    /// Sessions per client.
    pub by_client: HashMap<String, usize>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    by_client: HashMap<String, HashSet<String>>,
}

impl Tables {
    fn remove(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        if let Some(ids) = self.by_client.get_mut(&session.client_id) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.by_client.remove(&session.client_id);
            }
        }
        Some(session)
    }
}

/// Session table with caps and idle expiry.
pub struct SessionManager {
    max_concurrent: usize,
    max_per_client: usize,
    allow_shared: bool,
    idle_timeout: Duration,
    tables: RwLock<Tables>,
}

impl SessionManager {
    /// Create a manager from configuration.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            max_per_client: config.max_per_client,
            allow_shared: config.allow_shared,
            idle_timeout: Duration::minutes(config.timeout_minutes as i64),
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Create a new session for a client.
    pub async fn create(&self, options: CreateSessionOptions) -> Result<Session> {
        let mut tables = self.tables.write().await;

        let client_count = tables
            .by_client
            .get(&options.client_id)
            .map_or(0, HashSet::len);
        if client_count >= self.max_per_client {
            return Err(Error::SessionLimit(format!(
                "client {} has reached the maximum of {} sessions",
                options.client_id, self.max_per_client
            )));
        }

        if tables.sessions.len() >= self.max_concurrent {
            // Reclaim capacity from abandoned sessions before giving up.
            Self::sweep_tables(&mut tables, self.idle_timeout);
            if tables.sessions.len() >= self.max_concurrent {
                return Err(Error::SessionLimit(format!(
                    "maximum concurrent sessions ({}) reached; close some sessions first",
                    self.max_concurrent
                )));
            }
        }

        if options.shared && !self.allow_shared {
            return Err(Error::Authorization(
                "shared sessions are not allowed by configuration".into(),
            ));
        }

        let now = Utc::now();
        let session = Session {
            id: format!("sess_{}", uuid::Uuid::new_v4().simple()),
            client_id: options.client_id.clone(),
            created_at: now,
            last_activity: now,
            shared: options.shared,
            cdp_url: options.cdp_url,
            target_id: options.target_id,
            metadata: options.metadata,
        };

        tables.sessions.insert(session.id.clone(), session.clone());
        tables
            .by_client
            .entry(options.client_id)
            .or_default()
            .insert(session.id.clone());

        tracing::debug!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Look up a session. Any read counts as activity.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let mut tables = self.tables.write().await;
        let session = tables.sessions.get_mut(session_id)?;
        session.last_activity = Utc::now();
        Some(session.clone())
    }

    /// Access a session on behalf of a client, enforcing ownership.
    ///
    /// Shared sessions are open to any client; private sessions only to their
    /// owner. A grant refreshes the session's activity timestamp.
    pub async fn access(&self, session_id: &str, client_id: &str) -> Result<Session> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        if !session.shared && session.client_id != client_id {
            return Err(Error::SessionAccessDenied(session_id.to_string()));
        }

        session.last_activity = Utc::now();
        Ok(session.clone())
    }

    /// Release a session. No-op for unknown ids.
    pub async fn release(&self, session_id: &str) {
        let mut tables = self.tables.write().await;
        if tables.remove(session_id).is_some() {
            tracing::debug!(session_id, "session released");
        }
    }

    /// Release every session owned by a client (used on disconnect).
    /// Returns the count released.
    pub async fn release_client(&self, client_id: &str) -> usize {
        let mut tables = self.tables.write().await;
        let ids: Vec<String> = tables
            .by_client
            .get(client_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut count = 0;
        for id in ids {
            if tables.remove(&id).is_some() {
                count += 1;
            }
        }
        count
    }

    /// Release sessions idle past the timeout. Returns the count released.
    pub async fn sweep_expired(&self) -> usize {
        let mut tables = self.tables.write().await;
        Self::sweep_tables(&mut tables, self.idle_timeout)
    }

    fn sweep_tables(tables: &mut Tables, idle_timeout: Duration) -> usize {
        let cutoff = Utc::now() - idle_timeout;
        let expired: Vec<String> = tables
            .sessions
            .values()
            .filter(|s| s.last_activity < cutoff)
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            tables.remove(id);
            tracing::debug!(session_id = %id, "session expired");
        }
        expired.len()
    }

    /// Spawn the periodic expiry sweeper on its own task.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let swept = manager.sweep_expired().await;
                if swept > 0 {
                    tracing::info!(swept, "released expired sessions");
                }
            }
        })
    }

    /// Current statistics.
    pub async fn stats(&self) -> SessionStats {
        let tables = self.tables.read().await;
        let mut by_client: HashMap<String, usize> = HashMap::new();
        let mut shared = 0;
        for session in tables.sessions.values() {
            *by_client.entry(session.client_id.clone()).or_default() += 1;
            if session.shared {
                shared += 1;
            }
        }
        SessionStats {
            total: tables.sessions.len(),
            shared,
            by_client,
        }
    }

    /// All live sessions.
    pub async fn list(&self) -> Vec<Session> {
        self.tables.read().await.sessions.values().cloned().collect()
    }

    /// How many sessions a client currently holds.
    pub async fn client_session_count(&self, client_id: &str) -> usize {
        self.tables
            .read()
            .await
            .by_client
            .get(client_id)
            .map_or(0, HashSet::len)
    }

    /// Backdate a session's activity timestamp (test hook for expiry paths).
    #[cfg(test)]
    async fn backdate(&self, session_id: &str, by: Duration) {
        let mut tables = self.tables.write().await;
        if let Some(session) = tables.sessions.get_mut(session_id) {
            session.last_activity = session.last_activity - by;
        }
    }
}
