//! Session registry contract and the in-memory implementation.
//!
//! The registry is the server-side record of live sessions. The client
//! registers `{session id, secret}`; the server resolves a session id to its
//! secret when authenticating a request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::Zeroize;

use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use keyrelay_common::{Result, SessionId};

/// Response to `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    /// Whether the registry accepted the session.
    pub ok: bool,
}

/// A session as stored in the registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSession {
    /// Base64 session secret.
    pub secret: String,
    /// Expiry, epoch milliseconds.
    pub expires_at: i64,
}

impl fmt::Debug for ResolvedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSession")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for ResolvedSession {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Response to `prune`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneResponse {
    /// Number of expired sessions removed.
    pub removed_count: u64,
}

/// Session registry RPC contract.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Get the registry name (e.g., "memory", "http").
    fn name(&self) -> &str;

    /// Register a session secret (base64) under `session_id`.
    ///
    /// The registry assigns the expiry.
    async fn save(&self, session_id: &SessionId, secret: &str) -> Result<SaveResponse>;

    /// Look up a session. Returns `None` for unknown ids.
    ///
    /// Expired sessions may still be returned until pruned; callers compare
    /// `expires_at` themselves.
    async fn resolve(&self, session_id: &SessionId) -> Result<Option<ResolvedSession>>;

    /// Remove every session with `expires_at <= now_ms`.
    async fn prune(&self, now_ms: i64) -> Result<PruneResponse>;
}

/// In-memory session registry.
///
/// Entries expire `session_ttl` after `save`, measured on the injected clock.
#[derive(Clone)]
pub struct MemorySessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, ResolvedSession>>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl MemorySessionRegistry {
    /// Create a registry on the system clock.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a registry on a given clock.
    pub fn with_clock(config: &RelayConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl: config.ttl()?,
        })
    }

    /// Number of stored sessions, expired or not.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, session_id: &SessionId, secret: &str) -> Result<SaveResponse> {
        let expires_at = (self.clock.now() + self.ttl).timestamp_millis();
        self.sessions.write().await.insert(
            session_id.clone(),
            ResolvedSession {
                secret: secret.to_string(),
                expires_at,
            },
        );
        debug!(session_id = %session_id, expires_at, "Session registered");
        Ok(SaveResponse { ok: true })
    }

    async fn resolve(&self, session_id: &SessionId) -> Result<Option<ResolvedSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn prune(&self, now_ms: i64) -> Result<PruneResponse> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now_ms);
        let removed_count = (before - sessions.len()) as u64;

        if removed_count > 0 {
            debug!(removed_count, "Pruned expired sessions");
        }
        Ok(PruneResponse { removed_count })
    }
}
