//! Client side of the session relay.
//!
//! A session is a short-lived secret derived from vault key material plus
//! fresh randomness and registered with the session registry. Provider keys
//! are sealed under it per request, so the key itself is never sent.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::registry::{SaveResponse, SessionRegistry};
use keyrelay_common::{Error, Result, SessionId};
use keyrelay_crypto::{
    encoding, ensure_available, CryptoProvider, RawKeyMaterial, SessionSalt, SessionSecret,
    SALT_LENGTH,
};

/// Header carrying the session id.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Header carrying base64(nonce || ciphertext).
pub const SESSION_AUTH_HEADER: &str = "x-session-auth";

/// Cached session. Only ever stored after the registry accepted it.
struct SessionHandle {
    id: SessionId,
    secret: SessionSecret,
    expires_at: DateTime<Utc>,
    sealed_requests: u64,
}

impl SessionHandle {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("sealed_requests", &self.sealed_requests)
            .finish()
    }
}

/// Public view of the cached session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// Session id as registered.
    pub id: SessionId,
    /// When the session stops being usable.
    pub expires_at: DateTime<Utc>,
    /// Requests sealed under this session so far.
    pub sealed_requests: u64,
}

/// Request headers produced for, or received from, a relayed request.
///
/// Header names are stored lowercase. An empty set means no credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHeaders {
    headers: BTreeMap<String, String>,
}

impl SessionHeaders {
    /// An empty header set.
    pub fn empty() -> Self {
        Self::default()
    }

    fn sealed(session_id: &SessionId, auth: String) -> Self {
        let mut headers = Self::empty();
        headers.insert(SESSION_ID_HEADER, session_id.as_str());
        headers.insert(SESSION_AUTH_HEADER, auth);
        headers
    }

    /// Insert a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Look up a header by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The `x-session-id` value.
    pub fn session_id(&self) -> Option<&str> {
        self.get(SESSION_ID_HEADER)
    }

    /// The `x-session-auth` value.
    pub fn auth(&self) -> Option<&str> {
        self.get(SESSION_AUTH_HEADER)
    }

    /// Whether no headers are present.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Iterate headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for SessionHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::empty();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// Ephemeral session relay.
///
/// Holds at most one session. The slot is an async mutex held across
/// registration, so concurrent `ensure_session` calls issue one registration
/// and later callers see its outcome.
pub struct SessionRelay {
    registry: Arc<dyn SessionRegistry>,
    crypto: Arc<dyn CryptoProvider>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
    handle: Mutex<Option<SessionHandle>>,
}

impl SessionRelay {
    /// Create a relay against a registry.
    ///
    /// # Errors
    /// - Crypto provider self test failed
    /// - Invalid config
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        crypto: Arc<dyn CryptoProvider>,
        config: RelayConfig,
    ) -> Result<Self> {
        ensure_available(crypto.as_ref())?;
        config.validate()?;

        Ok(Self {
            registry,
            crypto,
            clock: Arc::new(SystemClock),
            config,
            handle: Mutex::new(None),
        })
    }

    /// Replace the clock used for expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Make sure a live session exists, registering a new one if needed.
    ///
    /// # Postconditions
    /// - On success a live session is cached and its id returned
    /// - On failure nothing is cached; an expired session is discarded
    ///
    /// # Errors
    /// - `SessionRegistrationFailed` if the registry errors, declines, or
    ///   does not answer within the request timeout
    pub async fn ensure_session(&self, raw: &RawKeyMaterial) -> Result<SessionId> {
        let mut slot = self.handle.lock().await;
        let now = self.clock.now();

        if let Some(handle) = slot.as_ref() {
            if handle.is_live(now) {
                debug!(session_id = %handle.id, "Reusing live session");
                return Ok(handle.id.clone());
            }
            debug!(session_id = %handle.id, "Cached session expired");
        }
        *slot = None;

        let mut salt_bytes = [0u8; SALT_LENGTH];
        self.crypto.random_bytes(&mut salt_bytes)?;
        let salt = SessionSalt::from_bytes(salt_bytes);
        salt_bytes.zeroize();

        let secret = SessionSecret::derive(&salt, raw);
        let id = SessionId::generate();
        let encoded = Zeroizing::new(encoding::encode(secret.as_bytes()));
        let expires_at = now + self.config.ttl()?;

        let outcome = tokio::time::timeout(
            self.config.request_timeout,
            self.registry.save(&id, &encoded),
        )
        .await;

        match outcome {
            Ok(Ok(SaveResponse { ok: true })) => {}
            Ok(Ok(SaveResponse { ok: false })) => {
                warn!(session_id = %id, registry = self.registry.name(), "Registry declined session");
                return Err(Error::SessionRegistrationFailed(
                    "registry declined the session".to_string(),
                ));
            }
            Ok(Err(e)) => {
                warn!(session_id = %id, error = %e, "Session registration failed");
                return Err(Error::SessionRegistrationFailed(e.to_string()));
            }
            Err(_) => {
                warn!(session_id = %id, timeout = ?self.config.request_timeout, "Session registration timed out");
                return Err(Error::SessionRegistrationFailed(format!(
                    "registry did not answer within {:?}",
                    self.config.request_timeout
                )));
            }
        }

        info!(session_id = %id, expires_at = %expires_at, "Session established");
        *slot = Some(SessionHandle {
            id: id.clone(),
            secret,
            expires_at,
            sealed_requests: 0,
        });
        Ok(id)
    }

    /// Seal `plaintext` under the live session into request headers.
    ///
    /// Returns an empty header set when there is no live session; callers
    /// must treat that as "no credentials", never fall back.
    pub async fn get_session_headers(&self, plaintext: &[u8]) -> Result<SessionHeaders> {
        let mut slot = self.handle.lock().await;
        let now = self.clock.now();

        let Some(handle) = slot.as_mut().filter(|h| h.is_live(now)) else {
            debug!("No live session, withholding headers");
            return Ok(SessionHeaders::empty());
        };

        let sealed = self.crypto.seal(&handle.secret, plaintext)?;
        handle.sealed_requests += 1;

        Ok(SessionHeaders::sealed(&handle.id, encoding::encode(&sealed)))
    }

    /// Drop the cached session. Does not contact the registry.
    pub async fn clear_session(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            info!(session_id = %handle.id, "Session cleared");
        }
    }

    /// Drop the cached session without waiting. Returns false if the slot
    /// is busy (a registration is in flight), in which case nothing changed.
    pub fn try_clear_session(&self) -> bool {
        match self.handle.try_lock() {
            Ok(mut slot) => {
                if let Some(handle) = slot.take() {
                    info!(session_id = %handle.id, "Session cleared");
                }
                true
            }
            Err(_) => false,
        }
    }

    /// The live session, if any.
    pub async fn active_session(&self) -> Option<ActiveSession> {
        let slot = self.handle.lock().await;
        let now = self.clock.now();

        slot.as_ref()
            .filter(|h| h.is_live(now))
            .map(|h| ActiveSession {
                id: h.id.clone(),
                expires_at: h.expires_at,
                sealed_requests: h.sealed_requests,
            })
    }

    /// Id of the live session.
    ///
    /// # Errors
    /// - `SessionExpired` if the cached session has lapsed
    /// - `NotFound` if there is no session
    pub async fn require_session(&self) -> Result<SessionId> {
        let slot = self.handle.lock().await;
        match slot.as_ref() {
            Some(handle) if handle.is_live(self.clock.now()) => Ok(handle.id.clone()),
            Some(_) => Err(Error::SessionExpired),
            None => Err(Error::NotFound("No session established".to_string())),
        }
    }
}
