//! Session relay configuration.

use std::time::Duration;

use keyrelay_common::{Error, Result};

/// Default lifetime of a registered session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// Default bound on a single registry call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for `SessionRelay` and the registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// How long a session stays usable after registration.
    pub session_ttl: Duration,
    /// Upper bound on each registry round trip.
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Create config with defaults (15 minute sessions, 10 second timeout).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Set the registry request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Session TTL as a signed duration for timestamp arithmetic.
    pub fn ttl(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.session_ttl)
            .map_err(|e| Error::InvalidInput(format!("Session TTL out of range: {}", e)))
    }

    /// Check that both durations are usable.
    ///
    /// # Errors
    /// - Zero TTL or timeout
    /// - TTL too large to add to a timestamp
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl.is_zero() {
            return Err(Error::InvalidInput("Session TTL must be non-zero".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "Request timeout must be non-zero".to_string(),
            ));
        }
        self.ttl()?;
        Ok(())
    }
}
