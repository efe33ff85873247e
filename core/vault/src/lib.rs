//! Credential vault for KeyRelay.
//!
//! This module provides:
//! - Vault creation, unlock and lock
//! - Encrypted per-provider key records
//! - Passphrase verification (canary or record probe)
//! - Passphrase change and full reset
//!
//! # Architecture
//! The vault sits between the front ends and a `VaultStore`, handling all
//! encryption and decryption through a `CryptoProvider`. Keys live only in
//! an in-memory context that is zeroized on lock.

pub mod config;
pub mod context;
pub mod record;
pub mod vault;

pub use config::{EncodedCiphertext, VaultMeta, VaultOptions, VerifierMode, DATA_KEY, META_KEY};
pub use context::VaultState;
pub use record::{RecordSet, VaultRecord};
pub use vault::CredentialVault;
