//! Common types used throughout KeyRelay.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a provider identifier in bytes.
pub const MAX_PROVIDER_ID_LEN: usize = 128;

/// Identifier of a third-party provider whose key is stored in the vault
/// (e.g. `"openAI"`, `"elevenLabs"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a new ProviderId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty, longer than `MAX_PROVIDER_ID_LEN`
    ///   bytes, or contains control characters
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "ProviderId cannot be empty".to_string(),
            ));
        }
        if id.len() > MAX_PROVIDER_ID_LEN {
            return Err(crate::Error::InvalidInput(format!(
                "ProviderId longer than {} bytes",
                MAX_PROVIDER_ID_LEN
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(crate::Error::InvalidInput(
                "ProviderId cannot contain control characters".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProviderId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a relay session, shared with the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an id received from the wire.
    pub fn parse(id: &str) -> crate::Result<Self> {
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "SessionId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id.to_string()))
    }

    /// Get the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
