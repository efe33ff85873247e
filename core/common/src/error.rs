//! Common error types for KeyRelay.

use thiserror::Error;

/// Top-level error type for KeyRelay operations.
///
/// `InvalidPassphrase` and `DecryptionFailed` deliberately carry no detail:
/// the category is all a caller learns about a failed authentication tag.
#[derive(Debug, Error)]
pub enum Error {
    /// No vault metadata is present in storage.
    #[error("Vault not found")]
    VaultNotFound,

    /// A vault already exists for this store.
    #[error("Vault already exists")]
    VaultAlreadyExists,

    /// The passphrase did not verify against the vault.
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    /// The operation requires an unlocked vault.
    #[error("Vault is locked")]
    VaultLocked,

    /// A stored record failed authentication or was malformed.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// The session handle has passed its expiry.
    #[error("Session expired")]
    SessionExpired,

    /// The session registry did not accept the session.
    #[error("Session registration failed: {0}")]
    SessionRegistrationFailed(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Vault operation failed.
    #[error("Vault error: {0}")]
    Vault(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrent modification detected.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_carry_no_detail() {
        assert_eq!(Error::InvalidPassphrase.to_string(), "Invalid passphrase");
        assert_eq!(Error::DecryptionFailed.to_string(), "Decryption failed");
    }

    #[test]
    fn test_serde_json_conversion() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
