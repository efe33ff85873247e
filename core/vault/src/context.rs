//! Unlocked vault context.
//!
//! Holds the derived keys in memory while the vault is unlocked. Keys are
//! zeroized when the context is dropped, which is how `lock` destroys them.

use std::fmt;

use keyrelay_crypto::{DerivedKeys, MasterKey, RawKeyMaterial};

/// State of a credential vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// No vault metadata exists in storage.
    NoVault,
    /// A vault exists and no keys are held in memory.
    Locked,
    /// Keys are available.
    Unlocked,
}

/// Keys held while the vault is unlocked. Never serialized or logged.
pub struct UnlockedContext {
    master_key: MasterKey,
    raw: RawKeyMaterial,
}

impl UnlockedContext {
    /// Take ownership of freshly derived keys.
    pub(crate) fn new(keys: DerivedKeys) -> Self {
        Self {
            master_key: keys.master_key,
            raw: keys.raw,
        }
    }

    /// Key for record encryption.
    pub(crate) fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    /// Raw material for seeding the session relay.
    pub(crate) fn raw(&self) -> &RawKeyMaterial {
        &self.raw
    }
}

impl fmt::Debug for UnlockedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnlockedContext([REDACTED])")
    }
}
