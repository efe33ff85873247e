//! Vault configuration and persisted metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyrelay_common::{Error, Result};
use keyrelay_crypto::kdf::MIN_ITERATIONS;
use keyrelay_crypto::{encoding, KdfParams, Salt, SealedRecord, SALT_LENGTH};

/// Store key of the vault metadata entry.
pub const META_KEY: &str = "vault_meta";

/// Store key of the encrypted record map.
pub const DATA_KEY: &str = "vault_data";

/// Fixed plaintext of the canary verifier.
pub(crate) const CANARY_PLAINTEXT: &[u8] = b"KEYRELAY_VAULT_CANARY_V2";

/// How a vault checks a passphrase on unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifierMode {
    /// A canary is encrypted at creation and must decrypt on unlock.
    #[default]
    Canary,
    /// No verifier is stored; unlock decrypts one existing record instead.
    /// A vault with no records accepts any passphrase.
    RecordProbe,
}

impl VerifierMode {
    /// Metadata schema version written for this mode.
    pub fn schema_version(&self) -> u32 {
        match self {
            VerifierMode::RecordProbe => 1,
            VerifierMode::Canary => 2,
        }
    }
}

/// Options applied when a vault is created.
#[derive(Debug, Clone, Default)]
pub struct VaultOptions {
    /// KDF parameters for new vaults. Existing vaults use their stored count.
    pub kdf: KdfParams,
    /// Passphrase verification strategy for new vaults.
    pub verifier: VerifierMode,
}

impl VaultOptions {
    /// Create options with defaults (250 000 iterations, canary verifier).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the KDF iteration count.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.kdf = KdfParams::new(iterations);
        self
    }

    /// Set the verifier mode.
    pub fn with_verifier(mut self, verifier: VerifierMode) -> Self {
        self.verifier = verifier;
        self
    }
}

/// Ciphertext/nonce pair as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedCiphertext {
    /// Base64 ciphertext including the authentication tag.
    pub ciphertext: String,
    /// Base64 96-bit nonce.
    pub nonce: String,
}

impl EncodedCiphertext {
    /// Encode a sealed record.
    pub fn encode(sealed: &SealedRecord) -> Self {
        Self {
            ciphertext: encoding::encode(&sealed.ciphertext),
            nonce: encoding::encode(&sealed.nonce),
        }
    }

    /// Decode back into a sealed record.
    pub fn decode(&self) -> Result<SealedRecord> {
        Ok(SealedRecord {
            nonce: encoding::decode_array(&self.nonce)?,
            ciphertext: encoding::decode(&self.ciphertext)?,
        })
    }
}

/// Vault metadata, stored under `vault_meta`.
///
/// Created once by `create_vault` and never modified afterwards except by a
/// passphrase change or a full reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMeta {
    /// Schema version (1 = record probe, 2 = canary verifier).
    pub version: u32,
    /// Base64 128-bit KDF salt.
    pub salt: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// KDF iteration count.
    pub iterations: u32,
    /// Encrypted canary, present for version 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<EncodedCiphertext>,
}

impl VaultMeta {
    /// Create metadata for a new vault.
    pub fn new(
        salt: &Salt,
        kdf: &KdfParams,
        mode: VerifierMode,
        verifier: Option<EncodedCiphertext>,
    ) -> Self {
        Self {
            version: mode.schema_version(),
            salt: encoding::encode(salt.as_bytes()),
            created_at: Utc::now(),
            iterations: kdf.iterations,
            verifier,
        }
    }

    /// Verifier mode implied by the schema version.
    pub fn verifier_mode(&self) -> VerifierMode {
        if self.version == VerifierMode::RecordProbe.schema_version() {
            VerifierMode::RecordProbe
        } else {
            VerifierMode::Canary
        }
    }

    /// Decoded KDF salt.
    pub fn salt(&self) -> Result<Salt> {
        Ok(Salt::from_bytes(encoding::decode_array::<SALT_LENGTH>(
            &self.salt,
        )?))
    }

    /// KDF parameters recorded at creation.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::new(self.iterations)
    }

    /// Check that this metadata can be opened by this build.
    ///
    /// # Errors
    /// - Unsupported schema version
    /// - Verifier presence inconsistent with the version
    /// - Malformed salt or iteration count
    pub fn validate(&self) -> Result<()> {
        let canary = VerifierMode::Canary.schema_version();
        let probe = VerifierMode::RecordProbe.schema_version();

        if self.version != canary && self.version != probe {
            return Err(Error::Vault(format!(
                "Unsupported vault schema version: {}",
                self.version
            )));
        }
        if (self.version == canary) != self.verifier.is_some() {
            return Err(Error::Vault(format!(
                "Vault metadata version {} has inconsistent verifier",
                self.version
            )));
        }
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::Vault(format!(
                "Vault iteration count {} below minimum",
                self.iterations
            )));
        }
        self.salt()?;
        Ok(())
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let meta: Self = serde_json::from_slice(bytes)?;
        meta.validate()?;
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mode: VerifierMode) -> VaultMeta {
        let verifier = match mode {
            VerifierMode::Canary => Some(EncodedCiphertext {
                ciphertext: encoding::encode(&[1u8; 40]),
                nonce: encoding::encode(&[2u8; 12]),
            }),
            VerifierMode::RecordProbe => None,
        };
        VaultMeta::new(
            &Salt::from_bytes([9u8; SALT_LENGTH]),
            &KdfParams::new(MIN_ITERATIONS),
            mode,
            verifier,
        )
    }

    #[test]
    fn test_meta_wire_format() {
        let meta = sample(VerifierMode::RecordProbe);
        let json: serde_json::Value = serde_json::from_slice(&meta.to_bytes().unwrap()).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["iterations"], MIN_ITERATIONS);
        assert!(json["salt"].is_string());
        assert!(json["createdAt"].as_str().unwrap().contains('T'));
        assert!(json.get("verifier").is_none());
    }

    #[test]
    fn test_meta_roundtrip_with_canary() {
        let meta = sample(VerifierMode::Canary);
        let restored = VaultMeta::from_bytes(&meta.to_bytes().unwrap()).unwrap();

        assert_eq!(restored, meta);
        assert_eq!(restored.verifier_mode(), VerifierMode::Canary);
        assert_eq!(restored.salt().unwrap().as_bytes(), &[9u8; SALT_LENGTH]);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut meta = sample(VerifierMode::Canary);
        meta.version = 7;
        assert!(matches!(
            VaultMeta::from_bytes(&meta.to_bytes().unwrap()),
            Err(Error::Vault(_))
        ));
    }

    #[test]
    fn test_inconsistent_verifier_rejected() {
        let mut meta = sample(VerifierMode::Canary);
        meta.verifier = None;
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_bad_salt_rejected() {
        let mut meta = sample(VerifierMode::RecordProbe);
        meta.salt = encoding::encode(&[0u8; 8]);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_options_builder() {
        let options = VaultOptions::new()
            .with_iterations(5_000)
            .with_verifier(VerifierMode::RecordProbe);
        assert_eq!(options.kdf.iterations, 5_000);
        assert_eq!(options.verifier, VerifierMode::RecordProbe);
        assert_eq!(VaultOptions::default().verifier, VerifierMode::Canary);
    }
}
