//! Cryptographic primitives for KeyRelay.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256
//! - Record encryption at rest using AES-256-GCM
//! - Per-request sealing using XChaCha20-Poly1305
//! - Session secret derivation using salted SHA-256
//! - The `CryptoProvider` capability trait the vault and relay are built on
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Every encryption draws a fresh random nonce

pub mod aead;
pub mod encoding;
pub mod kdf;
pub mod keys;
pub mod provider;

pub use aead::{SealedRecord, RECORD_NONCE_SIZE, SESSION_NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_key_material, DerivedKeys, KdfParams};
pub use keys::{
    MasterKey, RawKeyMaterial, Salt, SessionSalt, SessionSecret, KEY_LENGTH, SALT_LENGTH,
};
pub use provider::{ensure_available, CryptoProvider, RustCryptoProvider};
