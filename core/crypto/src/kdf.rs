//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! PBKDF2 is slow by iteration count but light on memory, which keeps the
//! unlock cost predictable on constrained clients.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{MasterKey, RawKeyMaterial, Salt, KEY_LENGTH};
use keyrelay_common::{Error, Result};

/// Default iteration count for new vaults.
pub const DEFAULT_ITERATIONS: u32 = 250_000;

/// Lowest iteration count accepted when creating or opening a vault.
pub const MIN_ITERATIONS: u32 = 1_000;

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// Create parameters with an explicit iteration count.
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Check the parameters against the enforced minimum.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "KDF iterations must be at least {}, got {}",
                MIN_ITERATIONS, self.iterations
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

/// Key material produced by one derivation.
#[derive(Debug, Clone)]
pub struct DerivedKeys {
    /// Key for vault record encryption.
    pub master_key: MasterKey,
    /// Raw derived bits, used only to seed the session relay.
    pub raw: RawKeyMaterial,
}

/// Derive vault key material from a passphrase and salt.
///
/// # Preconditions
/// - `passphrase` must not be empty
/// - `params` must pass `KdfParams::validate`
///
/// # Postconditions
/// - The result is deterministic given the same inputs
///
/// # Security
/// - Passphrase is not stored or logged
/// - The intermediate buffer is zeroized after use
pub fn derive_key_material(
    passphrase: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<DerivedKeys> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
    }
    params.validate()?;

    let mut bits = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(passphrase, salt.as_bytes(), params.iterations, &mut bits);

    let keys = DerivedKeys {
        master_key: MasterKey::from_bytes(bits),
        raw: RawKeyMaterial::from_bytes(bits),
    };
    bits.zeroize();

    Ok(keys)
}
