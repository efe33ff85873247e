//! Encrypted per-provider records, stored under `vault_data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::EncodedCiphertext;
use keyrelay_common::{ProviderId, Result};
use keyrelay_crypto::SealedRecord;

/// One provider's encrypted key. Never holds plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    /// Ciphertext and nonce, base64.
    #[serde(flatten)]
    pub sealed: EncodedCiphertext,
    /// When this record was last written.
    pub created_at: DateTime<Utc>,
}

impl VaultRecord {
    /// Wrap a freshly sealed record.
    pub fn new(sealed: &SealedRecord) -> Self {
        Self {
            sealed: EncodedCiphertext::encode(sealed),
            created_at: Utc::now(),
        }
    }

    /// Decode the sealed record for decryption.
    pub fn sealed(&self) -> Result<SealedRecord> {
        self.sealed.decode()
    }
}

/// The full record map, ordered by provider id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordSet {
    records: BTreeMap<ProviderId, VaultRecord>,
}

impl RecordSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a provider's record.
    pub fn get(&self, provider: &ProviderId) -> Option<&VaultRecord> {
        self.records.get(provider)
    }

    /// Insert or overwrite a provider's record.
    pub fn insert(&mut self, provider: ProviderId, record: VaultRecord) {
        self.records.insert(provider, record);
    }

    /// Remove a provider's record, returning it if present.
    pub fn remove(&mut self, provider: &ProviderId) -> Option<VaultRecord> {
        self.records.remove(provider)
    }

    /// The record with the lowest provider id, if any.
    pub fn first(&self) -> Option<(&ProviderId, &VaultRecord)> {
        self.records.iter().next()
    }

    /// Iterate records in provider order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProviderId, &VaultRecord)> {
        self.records.iter()
    }

    /// Provider ids with a record.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.records.keys()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
