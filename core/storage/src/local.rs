//! Local filesystem vault store.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::provider::{validate_key, StoredEntry, VaultStore, WriteCondition};
use keyrelay_common::{Error, Result};

const ENTRY_EXTENSION: &str = "json";
const LOCK_FILE: &str = ".lock";

/// Exclusive hold on a store root. The file lock is released when the
/// handle is dropped.
struct RootLock<'a> {
    _file: std::fs::File,
    _local: MutexGuard<'a, ()>,
}

/// On-disk wrapper around one entry. `data: None` is a tombstone that keeps
/// the revision counter alive after a removal.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    revision: u64,
    data: Option<String>,
}

/// Local filesystem vault store.
///
/// Stores each entry as `<root>/<key>.json`. Writes go to a temporary file
/// that is renamed over the entry. Every load, check and rename runs under an
/// exclusive lock on `<root>/.lock`, so separate handles and processes on the
/// same root never interleave their conditional writes.
pub struct LocalStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    async fn load(&self, key: &str) -> Result<Option<Envelope>> {
        match fs::read(self.entry_path(key)).await {
            Ok(bytes) => {
                let envelope = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Storage(format!("Corrupt entry '{}': {}", key, e))
                })?;
                Ok(Some(envelope))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_root(&self) -> Result<RootLock<'_>> {
        let local = self.write_lock.lock().await;
        let path = self.root.join(LOCK_FILE);

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock()?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::Storage(format!("Store lock task failed: {}", e)))??;

        Ok(RootLock {
            _file: file,
            _local: local,
        })
    }

    async fn persist(&self, key: &str, envelope: &Envelope) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension(format!("{}.tmp", ENTRY_EXTENSION));

        fs::write(&tmp, serde_json::to_vec(envelope)?).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&tmp, &path).await?;
        debug!(key, revision = envelope.revision, "persisted store entry");
        Ok(())
    }
}

#[async_trait]
impl VaultStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn read(&self, key: &str) -> Result<Option<StoredEntry>> {
        validate_key(key)?;

        let Some(envelope) = self.load(key).await? else {
            return Ok(None);
        };
        let Some(encoded) = envelope.data else {
            return Ok(None);
        };

        let data = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Storage(format!("Corrupt entry '{}': {}", key, e)))?;

        Ok(Some(StoredEntry {
            data,
            revision: envelope.revision,
        }))
    }

    async fn write(&self, key: &str, data: Vec<u8>, condition: WriteCondition) -> Result<u64> {
        validate_key(key)?;
        let _guard = self.lock_root().await?;

        let existing = self.load(key).await?;
        let current = existing
            .as_ref()
            .filter(|e| e.data.is_some())
            .map(|e| e.revision);
        condition.check(key, current)?;

        let revision = existing.map(|e| e.revision).unwrap_or(0) + 1;
        self.persist(
            key,
            &Envelope {
                revision,
                data: Some(STANDARD.encode(&data)),
            },
        )
        .await?;

        Ok(revision)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let _guard = self.lock_root().await?;

        match self.load(key).await? {
            Some(envelope) if envelope.data.is_some() => {
                self.persist(
                    key,
                    &Envelope {
                        revision: envelope.revision + 1,
                        data: None,
                    },
                )
                .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_key(key).is_err() {
                continue;
            }
            if let Some(Envelope { data: Some(_), .. }) = self.load(key).await? {
                keys.push(key.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }
}
