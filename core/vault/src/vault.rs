//! Credential vault lifecycle and per-provider key storage.

use std::collections::BTreeSet;
use std::sync::Arc;

use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::config::{
    EncodedCiphertext, VaultMeta, VaultOptions, VerifierMode, CANARY_PLAINTEXT, DATA_KEY,
    META_KEY,
};
use crate::context::{UnlockedContext, VaultState};
use crate::record::{RecordSet, VaultRecord};
use keyrelay_common::{Error, ProviderId, Result};
use keyrelay_crypto::{
    ensure_available, CryptoProvider, DerivedKeys, KdfParams, MasterKey, RawKeyMaterial,
    RustCryptoProvider, Salt, SALT_LENGTH,
};
use keyrelay_storage::{VaultStore, WriteCondition};

/// Attempts at a conditional record-set write before giving up.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Passphrase-protected store of per-provider API keys.
///
/// # Concurrency
/// Every mutation of persisted state goes through `write_queue`, and every
/// record-set write is conditional on the revision it was computed from.
/// Lock order is always `write_queue` before `unlocked`.
pub struct CredentialVault {
    store: Arc<dyn VaultStore>,
    crypto: Arc<dyn CryptoProvider>,
    options: VaultOptions,
    unlocked: RwLock<Option<UnlockedContext>>,
    write_queue: Mutex<()>,
}

impl CredentialVault {
    /// Create a vault handle over a store.
    ///
    /// Runs the crypto provider self test first so that an environment
    /// without working authenticated encryption fails here, not later.
    ///
    /// # Errors
    /// - Crypto provider self test failed
    /// - KDF parameters below the enforced minimum
    pub fn new(
        store: Arc<dyn VaultStore>,
        crypto: Arc<dyn CryptoProvider>,
        options: VaultOptions,
    ) -> Result<Self> {
        ensure_available(crypto.as_ref())?;
        options.kdf.validate()?;

        Ok(Self {
            store,
            crypto,
            options,
            unlocked: RwLock::new(None),
            write_queue: Mutex::new(()),
        })
    }

    /// Create a vault handle with the default crypto provider and options.
    pub fn with_defaults(store: Arc<dyn VaultStore>) -> Result<Self> {
        Self::new(
            store,
            Arc::new(RustCryptoProvider::new()),
            VaultOptions::default(),
        )
    }

    /// Get the options used for vault creation.
    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    /// Get the crypto provider.
    pub fn crypto(&self) -> Arc<dyn CryptoProvider> {
        self.crypto.clone()
    }

    /// Check whether vault metadata is present in storage.
    pub async fn exists(&self) -> Result<bool> {
        self.store.exists(META_KEY).await
    }

    /// Get the current vault state.
    pub async fn state(&self) -> Result<VaultState> {
        if self.unlocked.read().await.is_some() {
            return Ok(VaultState::Unlocked);
        }
        if self.exists().await? {
            Ok(VaultState::Locked)
        } else {
            Ok(VaultState::NoVault)
        }
    }

    /// Check whether keys are held in memory.
    pub async fn is_unlocked(&self) -> bool {
        self.unlocked.read().await.is_some()
    }

    /// Create a new vault and leave it unlocked.
    ///
    /// # Postconditions
    /// - `vault_meta` holds a fresh random salt and the KDF iteration count
    /// - `vault_data` holds an empty record set
    /// - The vault is Unlocked
    ///
    /// # Errors
    /// - `VaultAlreadyExists` if metadata is already present
    /// - `InvalidInput` if the passphrase is empty
    pub async fn create_vault(&self, passphrase: &[u8]) -> Result<()> {
        let _queue = self.write_queue.lock().await;

        if self.store.exists(META_KEY).await? {
            return Err(Error::VaultAlreadyExists);
        }

        let salt = self.generate_salt()?;
        let keys = self.derive(passphrase, salt.clone(), self.options.kdf).await?;

        let verifier = match self.options.verifier {
            VerifierMode::Canary => Some(self.seal_canary(&keys.master_key)?),
            VerifierMode::RecordProbe => None,
        };
        let meta = VaultMeta::new(&salt, &self.options.kdf, self.options.verifier, verifier);

        match self
            .store
            .write(META_KEY, meta.to_bytes()?, WriteCondition::Absent)
            .await
        {
            Err(Error::Conflict(_)) => return Err(Error::VaultAlreadyExists),
            other => {
                other?;
            }
        }
        self.store
            .write(DATA_KEY, RecordSet::new().to_bytes()?, WriteCondition::Any)
            .await?;

        *self.unlocked.write().await = Some(UnlockedContext::new(keys));

        info!(
            store = self.store.name(),
            iterations = meta.iterations,
            version = meta.version,
            "Vault created"
        );
        Ok(())
    }

    /// Unlock an existing vault.
    ///
    /// Cancel-safe: the unlocked context is installed in one step after the
    /// passphrase has been verified, so dropping this future at any await
    /// point leaves the vault state unchanged.
    ///
    /// # Errors
    /// - `VaultNotFound` if no metadata is present
    /// - `InvalidPassphrase` if verification fails; the state is unchanged
    pub async fn unlock(&self, passphrase: &[u8]) -> Result<()> {
        let _queue = self.write_queue.lock().await;

        let meta = self.load_meta().await?.ok_or(Error::VaultNotFound)?;
        let keys = self.derive(passphrase, meta.salt()?, meta.kdf_params()).await?;
        let (_, records) = self.load_records().await?;

        if let Err(e) = self.verify_passphrase(&meta, &keys, &records) {
            warn!("Passphrase verification failed");
            return Err(e);
        }

        *self.unlocked.write().await = Some(UnlockedContext::new(keys));
        info!("Vault unlocked");
        Ok(())
    }

    /// Lock the vault, zeroizing all keys held in memory.
    pub async fn lock(&self) {
        if self.unlocked.write().await.take().is_some() {
            info!("Vault locked");
        }
    }

    /// Lock without waiting. Returns false if the context is busy, in which
    /// case nothing changed.
    ///
    /// For use from `Drop`, where `lock` cannot be awaited.
    pub fn try_lock(&self) -> bool {
        match self.unlocked.try_write() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    info!("Vault locked");
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Encrypt and store a provider's key, replacing any previous record.
    ///
    /// # Errors
    /// - `VaultLocked` unless Unlocked
    /// - `Conflict` if another writer kept changing the record set
    pub async fn save_key(&self, provider: &ProviderId, plaintext: &str) -> Result<()> {
        let _queue = self.write_queue.lock().await;

        let record = {
            let guard = self.unlocked.read().await;
            let ctx = guard.as_ref().ok_or(Error::VaultLocked)?;
            VaultRecord::new(
                &self
                    .crypto
                    .encrypt_record(ctx.master_key(), plaintext.as_bytes())?,
            )
        };

        self.modify_records(|records| {
            records.insert(provider.clone(), record.clone());
            true
        })
        .await?;

        debug!(provider = %provider, "Key saved");
        Ok(())
    }

    /// Decrypt a provider's key.
    ///
    /// # Returns
    /// `None` if no record exists for the provider.
    ///
    /// # Errors
    /// - `VaultLocked` unless Unlocked
    /// - `DecryptionFailed` if the record is corrupt or was tampered with
    pub async fn get_key(&self, provider: &ProviderId) -> Result<Option<Zeroizing<String>>> {
        let guard = self.unlocked.read().await;
        let ctx = guard.as_ref().ok_or(Error::VaultLocked)?;

        let (_, records) = self.load_records().await?;
        let Some(record) = records.get(provider) else {
            return Ok(None);
        };

        let sealed = record.sealed().map_err(|_| Error::DecryptionFailed)?;
        let mut plaintext = self.crypto.decrypt_record(ctx.master_key(), &sealed)?;

        match String::from_utf8(std::mem::take(&mut *plaintext)) {
            Ok(key) => Ok(Some(Zeroizing::new(key))),
            Err(e) => {
                e.into_bytes().zeroize();
                Err(Error::DecryptionFailed)
            }
        }
    }

    /// Remove a provider's record. No-op if there is none.
    ///
    /// Works whether or not the vault is unlocked: removal needs no key.
    pub async fn delete_key(&self, provider: &ProviderId) -> Result<()> {
        let _queue = self.write_queue.lock().await;

        if self
            .modify_records(|records| records.remove(provider).is_some())
            .await?
        {
            debug!(provider = %provider, "Key deleted");
        }
        Ok(())
    }

    /// List providers with a stored record. Needs no key.
    pub async fn list_providers(&self) -> Result<BTreeSet<ProviderId>> {
        let (_, records) = self.load_records().await?;
        Ok(records.providers().cloned().collect())
    }

    /// Delete the vault metadata and every record, and lock.
    ///
    /// Irreversible.
    pub async fn reset_vault(&self) -> Result<()> {
        let _queue = self.write_queue.lock().await;

        self.unlocked.write().await.take();
        self.store.remove(META_KEY).await?;
        self.store.remove(DATA_KEY).await?;

        info!("Vault reset");
        Ok(())
    }

    /// Copy of the raw key material, for seeding a relay session.
    ///
    /// # Errors
    /// - `VaultLocked` unless Unlocked
    pub async fn raw_key_material(&self) -> Result<RawKeyMaterial> {
        let guard = self.unlocked.read().await;
        let ctx = guard.as_ref().ok_or(Error::VaultLocked)?;
        Ok(ctx.raw().clone())
    }

    /// Re-key the vault under a new passphrase.
    ///
    /// Verifies `old` the same way `unlock` does, derives new keys with a
    /// fresh salt, re-encrypts every record with fresh nonces, and leaves
    /// the vault unlocked under the new keys.
    ///
    /// The record set is written before the metadata; the two writes are not
    /// atomic as a pair.
    ///
    /// # Errors
    /// - `VaultNotFound` if no metadata is present
    /// - `InvalidPassphrase` if `old` does not verify
    /// - `InvalidInput` if `new` is empty
    pub async fn change_passphrase(&self, old: &[u8], new: &[u8]) -> Result<()> {
        let _queue = self.write_queue.lock().await;

        let meta_entry = self
            .store
            .read(META_KEY)
            .await?
            .ok_or(Error::VaultNotFound)?;
        let meta = VaultMeta::from_bytes(&meta_entry.data)?;

        let old_keys = self.derive(old, meta.salt()?, meta.kdf_params()).await?;
        let (data_condition, records) = self.load_records().await?;
        if let Err(e) = self.verify_passphrase(&meta, &old_keys, &records) {
            warn!("Passphrase verification failed");
            return Err(e);
        }

        let salt = self.generate_salt()?;
        let kdf = self.options.kdf;
        let new_keys = self.derive(new, salt.clone(), kdf).await?;

        let mut reencrypted = RecordSet::new();
        for (provider, record) in records.iter() {
            let plaintext = self
                .crypto
                .decrypt_record(&old_keys.master_key, &record.sealed()?)?;
            let sealed = self.crypto.encrypt_record(&new_keys.master_key, &plaintext)?;
            reencrypted.insert(
                provider.clone(),
                VaultRecord {
                    sealed: EncodedCiphertext::encode(&sealed),
                    created_at: record.created_at,
                },
            );
        }

        let mode = self.options.verifier;
        let verifier = match mode {
            VerifierMode::Canary => Some(self.seal_canary(&new_keys.master_key)?),
            VerifierMode::RecordProbe => None,
        };
        let mut new_meta = VaultMeta::new(&salt, &kdf, mode, verifier);
        new_meta.created_at = meta.created_at;

        self.store
            .write(DATA_KEY, reencrypted.to_bytes()?, data_condition)
            .await?;
        self.store
            .write(
                META_KEY,
                new_meta.to_bytes()?,
                WriteCondition::Revision(meta_entry.revision),
            )
            .await?;

        *self.unlocked.write().await = Some(UnlockedContext::new(new_keys));

        info!(records = reencrypted.len(), "Vault passphrase changed");
        Ok(())
    }

    async fn load_meta(&self) -> Result<Option<VaultMeta>> {
        match self.store.read(META_KEY).await? {
            Some(entry) => Ok(Some(VaultMeta::from_bytes(&entry.data)?)),
            None => Ok(None),
        }
    }

    /// Load the record set with the write condition that replaces exactly it.
    async fn load_records(&self) -> Result<(WriteCondition, RecordSet)> {
        let entry = self.store.read(DATA_KEY).await?;
        let records = match &entry {
            Some(entry) => RecordSet::from_bytes(&entry.data)?,
            None => RecordSet::new(),
        };
        Ok((WriteCondition::matching(entry.as_ref()), records))
    }

    /// Read-modify-write of the record set. Caller holds `write_queue`.
    ///
    /// `apply` returns whether it changed anything; nothing is written if
    /// not. Returns whether a write happened.
    async fn modify_records<F>(&self, mut apply: F) -> Result<bool>
    where
        F: FnMut(&mut RecordSet) -> bool + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (condition, mut records) = self.load_records().await?;
            if !apply(&mut records) {
                return Ok(false);
            }

            match self
                .store
                .write(DATA_KEY, records.to_bytes()?, condition)
                .await
            {
                Ok(revision) => {
                    debug!(revision, "Record set written");
                    return Ok(true);
                }
                Err(Error::Conflict(reason)) => {
                    warn!(attempt, %reason, "Record set changed during write, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "Record set kept changing after {} attempts",
            MAX_WRITE_ATTEMPTS
        )))
    }

    /// Run the KDF on the blocking pool.
    async fn derive(&self, passphrase: &[u8], salt: Salt, params: KdfParams) -> Result<DerivedKeys> {
        let crypto = self.crypto.clone();
        let passphrase = Zeroizing::new(passphrase.to_vec());

        tokio::task::spawn_blocking(move || {
            crypto.derive_key_material(&passphrase, &salt, &params)
        })
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
    }

    fn generate_salt(&self) -> Result<Salt> {
        let mut bytes = [0u8; SALT_LENGTH];
        self.crypto.random_bytes(&mut bytes)?;
        Ok(Salt::from_bytes(bytes))
    }

    fn seal_canary(&self, key: &MasterKey) -> Result<EncodedCiphertext> {
        let sealed = self.crypto.encrypt_record(key, CANARY_PLAINTEXT)?;
        Ok(EncodedCiphertext::encode(&sealed))
    }

    /// Check derived keys against the vault.
    ///
    /// Canary vaults decrypt the canary. Record-probe vaults decrypt the
    /// record with the lowest provider id; with no records there is nothing
    /// to check against and any passphrase is accepted.
    fn verify_passphrase(
        &self,
        meta: &VaultMeta,
        keys: &DerivedKeys,
        records: &RecordSet,
    ) -> Result<()> {
        match meta.verifier_mode() {
            VerifierMode::Canary => {
                let verifier = meta
                    .verifier
                    .as_ref()
                    .ok_or_else(|| Error::Vault("Canary vault has no verifier".to_string()))?;
                let sealed = verifier.decode().map_err(|_| Error::InvalidPassphrase)?;
                let plaintext = self
                    .crypto
                    .decrypt_record(&keys.master_key, &sealed)
                    .map_err(|_| Error::InvalidPassphrase)?;
                if !bool::from(plaintext.as_slice().ct_eq(CANARY_PLAINTEXT)) {
                    return Err(Error::InvalidPassphrase);
                }
            }
            VerifierMode::RecordProbe => {
                if let Some((_, record)) = records.first() {
                    let sealed = record.sealed().map_err(|_| Error::InvalidPassphrase)?;
                    self.crypto
                        .decrypt_record(&keys.master_key, &sealed)
                        .map_err(|_| Error::InvalidPassphrase)?;
                }
            }
        }
        Ok(())
    }
}
