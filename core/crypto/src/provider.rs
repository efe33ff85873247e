//! Cryptographic capability interface.
//!
//! The vault and the relay never call cipher crates directly; they go
//! through a `CryptoProvider`. An environment that cannot supply a secure
//! implementation must fail `ensure_available` before any vault is opened.

use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::aead::{self, SealedRecord};
use crate::kdf::{self, DerivedKeys, KdfParams};
use crate::keys::{MasterKey, Salt, SessionSecret, KEY_LENGTH};
use keyrelay_common::{Error, Result};

/// Capability interface over the primitives the vault and relay need.
pub trait CryptoProvider: Send + Sync {
    /// Get the provider name (e.g., "rustcrypto").
    fn name(&self) -> &str;

    /// Fill `buf` from a cryptographically secure source.
    fn random_bytes(&self, buf: &mut [u8]) -> Result<()>;

    /// Derive vault key material from a passphrase.
    fn derive_key_material(
        &self,
        passphrase: &[u8],
        salt: &Salt,
        params: &KdfParams,
    ) -> Result<DerivedKeys>;

    /// Encrypt a vault record under the master key.
    fn encrypt_record(&self, key: &MasterKey, plaintext: &[u8]) -> Result<SealedRecord>;

    /// Decrypt a vault record under the master key.
    fn decrypt_record(&self, key: &MasterKey, record: &SealedRecord)
        -> Result<Zeroizing<Vec<u8>>>;

    /// Seal a request payload under a session secret (nonce || ciphertext).
    fn seal(&self, secret: &SessionSecret, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open a request payload sealed under a session secret.
    fn open(&self, secret: &SessionSecret, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Default provider backed by the RustCrypto crates and the OS RNG.
#[derive(Debug, Clone, Default)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for RustCryptoProvider {
    fn name(&self) -> &str {
        "rustcrypto"
    }

    fn random_bytes(&self, buf: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| Error::Crypto(format!("Random source unavailable: {}", e)))
    }

    fn derive_key_material(
        &self,
        passphrase: &[u8],
        salt: &Salt,
        params: &KdfParams,
    ) -> Result<DerivedKeys> {
        kdf::derive_key_material(passphrase, salt, params)
    }

    fn encrypt_record(&self, key: &MasterKey, plaintext: &[u8]) -> Result<SealedRecord> {
        aead::encrypt_record(key.as_bytes(), plaintext)
    }

    fn decrypt_record(
        &self,
        key: &MasterKey,
        record: &SealedRecord,
    ) -> Result<Zeroizing<Vec<u8>>> {
        aead::decrypt_record(key.as_bytes(), record).map(Zeroizing::new)
    }

    fn seal(&self, secret: &SessionSecret, plaintext: &[u8]) -> Result<Vec<u8>> {
        aead::seal(secret.as_bytes(), plaintext)
    }

    fn open(&self, secret: &SessionSecret, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        aead::open(secret.as_bytes(), sealed).map(Zeroizing::new)
    }
}

/// Run a known-answer self test against a provider.
///
/// # Errors
/// - `Crypto` if the random source returns all zeroes, a round trip does not
///   reproduce its input, or a tampered ciphertext is accepted
pub fn ensure_available(provider: &dyn CryptoProvider) -> Result<()> {
    let mut key_bytes = [0u8; KEY_LENGTH];
    provider.random_bytes(&mut key_bytes)?;
    if bool::from(key_bytes[..].ct_eq(&[0u8; KEY_LENGTH][..])) {
        return Err(Error::Crypto(format!(
            "Provider '{}' returned an all-zero random block",
            provider.name()
        )));
    }

    let probe = b"keyrelay-self-test";
    let key = MasterKey::from_bytes(key_bytes);
    let mut record = provider.encrypt_record(&key, probe)?;
    if provider.decrypt_record(&key, &record)?.as_slice() != probe {
        return Err(Error::Crypto(format!(
            "Provider '{}' failed the record round trip",
            provider.name()
        )));
    }
    record.ciphertext[0] ^= 0x01;
    if provider.decrypt_record(&key, &record).is_ok() {
        return Err(Error::Crypto(format!(
            "Provider '{}' accepted a tampered record",
            provider.name()
        )));
    }

    let secret = SessionSecret::from_bytes(key_bytes);
    key_bytes.zeroize();
    let sealed = provider.seal(&secret, probe)?;
    if provider.open(&secret, &sealed)?.as_slice() != probe {
        return Err(Error::Crypto(format!(
            "Provider '{}' failed the session round trip",
            provider.name()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroRng;

    impl CryptoProvider for ZeroRng {
        fn name(&self) -> &str {
            "zero"
        }

        fn random_bytes(&self, buf: &mut [u8]) -> Result<()> {
            buf.fill(0);
            Ok(())
        }

        fn derive_key_material(&self, p: &[u8], s: &Salt, k: &KdfParams) -> Result<DerivedKeys> {
            RustCryptoProvider.derive_key_material(p, s, k)
        }

        fn encrypt_record(&self, key: &MasterKey, plaintext: &[u8]) -> Result<SealedRecord> {
            RustCryptoProvider.encrypt_record(key, plaintext)
        }

        fn decrypt_record(&self, key: &MasterKey, r: &SealedRecord) -> Result<Zeroizing<Vec<u8>>> {
            RustCryptoProvider.decrypt_record(key, r)
        }

        fn seal(&self, secret: &SessionSecret, plaintext: &[u8]) -> Result<Vec<u8>> {
            RustCryptoProvider.seal(secret, plaintext)
        }

        fn open(&self, secret: &SessionSecret, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
            RustCryptoProvider.open(secret, sealed)
        }
    }

    #[test]
    fn test_default_provider_passes_self_test() {
        ensure_available(&RustCryptoProvider::new()).unwrap();
    }

    #[test]
    fn test_broken_rng_fails_fast() {
        assert!(matches!(ensure_available(&ZeroRng), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_random_bytes_differ() {
        let provider = RustCryptoProvider::new();
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        provider.random_bytes(&mut a).unwrap();
        provider.random_bytes(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
