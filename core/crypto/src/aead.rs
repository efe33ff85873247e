//! Authenticated encryption.
//!
//! Two ciphers are used, one per purpose:
//! - AES-256-GCM with a 12-byte random nonce for vault records at rest
//! - XChaCha20-Poly1305 with a 24-byte random nonce for per-request payloads,
//!   where messages are frequent and no counter is kept, so the nonce space
//!   must make random collisions negligible

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use keyrelay_common::{Error, Result};

/// Nonce size for AES-256-GCM records (12 bytes).
pub const RECORD_NONCE_SIZE: usize = 12;

/// Nonce size for XChaCha20-Poly1305 session payloads (24 bytes).
pub const SESSION_NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes), shared by both ciphers.
pub const TAG_SIZE: usize = 16;

/// Ciphertext and nonce of one record encryption, stored side by side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    /// Nonce drawn for this encryption.
    pub nonce: [u8; RECORD_NONCE_SIZE],
    /// Ciphertext including the authentication tag.
    pub ciphertext: Vec<u8>,
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(())
}

/// Encrypt a record using AES-256-GCM.
///
/// # Postconditions
/// - The nonce is freshly generated for this call
/// - `ciphertext.len() == plaintext.len() + TAG_SIZE`
///
/// # Errors
/// - Returns error if key length is incorrect
pub fn encrypt_record(key: &[u8], plaintext: &[u8]) -> Result<SealedRecord> {
    check_key(key)?;

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; RECORD_NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(SealedRecord {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt a record produced by `encrypt_record`.
///
/// # Errors
/// - `DecryptionFailed` on any authentication failure; the cause is not
///   reported
pub fn decrypt_record(key: &[u8], record: &SealedRecord) -> Result<Vec<u8>> {
    check_key(key)?;

    if record.ciphertext.len() < TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt(GenericArray::from_slice(&record.nonce), record.ciphertext.as_slice())
        .map_err(|_| Error::DecryptionFailed)
}

/// Seal a payload using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(SESSION_NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Open a payload produced by `seal`.
///
/// # Errors
/// - `DecryptionFailed` if the payload is too short or fails authentication
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    if sealed.len() < SESSION_NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let (nonce_bytes, encrypted) = sealed.split_at(SESSION_NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));

    cipher
        .decrypt(GenericArray::from_slice(nonce_bytes), encrypted)
        .map_err(|_| Error::DecryptionFailed)
}
