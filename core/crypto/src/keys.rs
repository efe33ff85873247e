//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of vault and session salts in bytes (128-bit).
pub const SALT_LENGTH: usize = 16;

/// Symmetric key used only to encrypt and decrypt vault records.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Raw bits produced by the passphrase KDF.
///
/// The master key is imported from these bits; the session relay hashes
/// them together with fresh randomness to seed a session secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RawKeyMaterial {
    bytes: [u8; KEY_LENGTH],
}

impl RawKeyMaterial {
    /// Create raw key material from bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.bytes
    }
}

impl fmt::Debug for RawKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawKeyMaterial([REDACTED])")
    }
}

/// Short-lived key authorizing outbound requests for one relay session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret {
    key: [u8; KEY_LENGTH],
}

impl SessionSecret {
    /// Derive a session secret as `SHA-256(salt || raw)`.
    ///
    /// The salt must be fresh for every session so that two sessions seeded
    /// from the same vault never share a secret.
    pub fn derive(salt: &SessionSalt, raw: &RawKeyMaterial) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(raw.as_bytes());

        let result = hasher.finalize();
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&result);
        Self { key }
    }

    /// Rebuild a secret received from the session registry.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionSecret([REDACTED])")
    }
}

/// Salt for passphrase key derivation, fixed at vault creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// Per-session salt mixed into the session secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSalt([u8; SALT_LENGTH]);

impl SessionSalt {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}
