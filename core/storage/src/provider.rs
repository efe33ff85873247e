//! Vault store trait definition.

use async_trait::async_trait;

use keyrelay_common::{Error, Result};

/// A stored value together with the revision it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Opaque entry bytes.
    pub data: Vec<u8>,
    /// Revision stamp. A key's revision increases on every write or removal
    /// and is never reused.
    pub revision: u64,
}

/// Precondition checked atomically with a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Write unconditionally.
    Any,
    /// Write only if the key holds no entry.
    Absent,
    /// Write only if the entry is still at this revision.
    Revision(u64),
}

impl WriteCondition {
    /// Condition for replacing whatever was read, including "nothing".
    pub fn matching(entry: Option<&StoredEntry>) -> Self {
        match entry {
            Some(entry) => WriteCondition::Revision(entry.revision),
            None => WriteCondition::Absent,
        }
    }

    /// Check the condition against the current revision of a key.
    pub(crate) fn check(&self, key: &str, current: Option<u64>) -> Result<()> {
        match (self, current) {
            (WriteCondition::Any, _) => Ok(()),
            (WriteCondition::Absent, None) => Ok(()),
            (WriteCondition::Absent, Some(_)) => Err(Error::Conflict(format!(
                "Entry '{}' already exists",
                key
            ))),
            (WriteCondition::Revision(expected), Some(actual)) if *expected == actual => Ok(()),
            (WriteCondition::Revision(expected), actual) => Err(Error::Conflict(format!(
                "Entry '{}' changed: expected revision {}, found {:?}",
                key, expected, actual
            ))),
        }
    }
}

/// Check that a key is usable as a flat entry name on every backend.
///
/// Keys are limited to ASCII letters, digits, `_` and `-`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Store key cannot be empty".to_string()));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidInput(format!("Invalid store key: {}", key)));
    }
    Ok(())
}

/// Storage backend for the persisted vault entries.
///
/// All operations are async. Implementations must apply a write and its
/// `WriteCondition` as a single step.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read an entry.
    ///
    /// # Returns
    /// `None` if the key holds no entry.
    async fn read(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Write an entry if `condition` holds.
    ///
    /// # Postconditions
    /// - The entry is replaced and carries a new, higher revision
    ///
    /// # Errors
    /// - `Conflict` if the condition does not hold
    /// - I/O errors
    async fn write(&self, key: &str, data: Vec<u8>, condition: WriteCondition) -> Result<u64>;

    /// Remove an entry.
    ///
    /// # Returns
    /// Whether an entry was present.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Check if a key holds an entry.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }

    /// List keys that hold an entry.
    async fn keys(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_matching() {
        let entry = StoredEntry {
            data: vec![1],
            revision: 4,
        };
        assert_eq!(WriteCondition::matching(Some(&entry)), WriteCondition::Revision(4));
        assert_eq!(WriteCondition::matching(None), WriteCondition::Absent);
    }

    #[test]
    fn test_condition_check() {
        assert!(WriteCondition::Any.check("k", Some(3)).is_ok());
        assert!(WriteCondition::Absent.check("k", None).is_ok());
        assert!(matches!(
            WriteCondition::Absent.check("k", Some(1)),
            Err(Error::Conflict(_))
        ));
        assert!(WriteCondition::Revision(2).check("k", Some(2)).is_ok());
        assert!(WriteCondition::Revision(2).check("k", Some(3)).is_err());
        assert!(WriteCondition::Revision(2).check("k", None).is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("vault_meta").is_ok());
        assert!(validate_key("vault-data2").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a b").is_err());
    }
}
