//! Vault session: the vault and the relay as one owned object.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use keyrelay_common::{Error, ProviderId, Result, SessionId};
use keyrelay_crypto::{CryptoProvider, RustCryptoProvider};
use keyrelay_relay::{ActiveSession, RelayConfig, SessionHeaders, SessionRegistry, SessionRelay};
use keyrelay_storage::create_default_registry;
use keyrelay_vault::{CredentialVault, VaultOptions, VaultState};

/// Snapshot of a vault session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Vault lifecycle state.
    pub vault: VaultState,
    /// Providers with a stored key.
    pub providers: BTreeSet<ProviderId>,
    /// Live relay session, if any.
    pub session: Option<ActiveSession>,
}

/// A credential vault paired with its session relay.
///
/// Unlocking the vault also establishes a relay session. Locking, or
/// dropping the `VaultSession`, locks the vault and forgets the session.
pub struct VaultSession {
    vault: Arc<CredentialVault>,
    relay: Arc<SessionRelay>,
}

impl VaultSession {
    /// Pair an existing vault and relay.
    pub fn new(vault: Arc<CredentialVault>, relay: Arc<SessionRelay>) -> Self {
        Self { vault, relay }
    }

    /// Build a session over a named store backend.
    ///
    /// `store` is a name known to the default store registry (`"memory"`,
    /// `"local"`) and `store_config` its JSON configuration.
    ///
    /// # Errors
    /// - Unknown store or invalid store configuration
    /// - Crypto self test or config validation failed
    pub fn open(
        store: &str,
        store_config: Value,
        options: VaultOptions,
        registry: Arc<dyn SessionRegistry>,
        relay_config: RelayConfig,
    ) -> Result<Self> {
        let store = create_default_registry().resolve(store, store_config)?;
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RustCryptoProvider::new());

        let vault = CredentialVault::new(store, crypto.clone(), options)?;
        let relay = SessionRelay::new(registry, crypto, relay_config)?;
        Ok(Self::new(Arc::new(vault), Arc::new(relay)))
    }

    /// Get the vault.
    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Get the relay.
    pub fn relay(&self) -> &SessionRelay {
        &self.relay
    }

    /// Create a new vault and establish a session.
    ///
    /// If session establishment fails the vault stays unlocked and the
    /// registration error is returned.
    pub async fn create(&self, passphrase: &[u8]) -> Result<SessionId> {
        self.vault.create_vault(passphrase).await?;
        self.establish().await
    }

    /// Unlock the vault and establish a session.
    ///
    /// If session establishment fails the vault stays unlocked and the
    /// registration error is returned.
    pub async fn unlock(&self, passphrase: &[u8]) -> Result<SessionId> {
        self.vault.unlock(passphrase).await?;
        self.establish().await
    }

    /// `unlock`, abandoned with `Cancelled` when `token` fires.
    ///
    /// A cancelled unlock leaves the vault locked and no session cached.
    pub async fn unlock_cancellable(
        &self,
        passphrase: &[u8],
        token: &CancellationToken,
    ) -> Result<SessionId> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.lock().await;
                info!("Unlock cancelled");
                Err(Error::Cancelled)
            }
            result = self.unlock(passphrase) => result,
        }
    }

    /// Produce request headers carrying a provider's key.
    ///
    /// Re-establishes the relay session if it has expired.
    ///
    /// # Errors
    /// - `VaultLocked` unless the vault is unlocked
    /// - `NotFound` if no key is stored for the provider
    /// - `SessionRegistrationFailed` if a new session cannot be registered
    /// - `SessionExpired` if no live session is available to seal under
    pub async fn authorize(&self, provider: &ProviderId) -> Result<SessionHeaders> {
        let key = self
            .vault
            .get_key(provider)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No key stored for provider '{}'", provider)))?;

        self.establish().await?;

        let headers = self.relay.get_session_headers(key.as_bytes()).await?;
        if headers.is_empty() {
            warn!(provider = %provider, "Session lapsed before headers were sealed");
            return Err(Error::SessionExpired);
        }

        debug!(provider = %provider, "Request authorized");
        Ok(headers)
    }

    /// Current vault state, providers and session.
    pub async fn status(&self) -> Result<SessionStatus> {
        Ok(SessionStatus {
            vault: self.vault.state().await?,
            providers: self.vault.list_providers().await?,
            session: self.relay.active_session().await,
        })
    }

    /// Lock the vault and forget the session.
    pub async fn lock(&self) {
        self.relay.clear_session().await;
        self.vault.lock().await;
    }

    /// Forget the session, then destroy the vault.
    ///
    /// The session is cleared first so no relayed header outlives the key
    /// material it was derived from.
    ///
    /// # Errors
    /// - Storage errors from removing the vault entries
    pub async fn reset(&self) -> Result<()> {
        self.relay.clear_session().await;
        self.vault.reset_vault().await
    }

    async fn establish(&self) -> Result<SessionId> {
        let raw = self.vault.raw_key_material().await?;
        self.relay.ensure_session(&raw).await
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        let cleared = self.relay.try_clear_session();
        let locked = self.vault.try_lock();
        if cleared && locked {
            return;
        }

        // Something is mid-operation; finish the lock once it lets go.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let vault = self.vault.clone();
                let relay = self.relay.clone();
                runtime.spawn(async move {
                    relay.clear_session().await;
                    vault.lock().await;
                });
            }
            Err(_) => warn!("Vault session dropped while busy and outside a runtime"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keyrelay_relay::{
        Clock, ManualClock, MemorySessionRegistry, PruneResponse, RequestAuthenticator,
        ResolvedSession, SaveResponse,
    };
    use keyrelay_storage::MemoryStore;
    use std::time::Duration;

    const ITERATIONS: u32 = 1_000;

    struct Fixture {
        session: VaultSession,
        registry: Arc<MemorySessionRegistry>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let config = RelayConfig::new().with_session_ttl(Duration::from_secs(60));
        let registry = Arc::new(
            MemorySessionRegistry::with_clock(&config, Arc::new(clock.clone())).unwrap(),
        );
        let crypto: Arc<dyn CryptoProvider> = Arc::new(RustCryptoProvider::new());

        let vault = CredentialVault::new(
            Arc::new(MemoryStore::new()),
            crypto.clone(),
            VaultOptions::new().with_iterations(ITERATIONS),
        )
        .unwrap();
        let relay = SessionRelay::new(registry.clone(), crypto, config)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        Fixture {
            session: VaultSession::new(Arc::new(vault), Arc::new(relay)),
            registry,
            clock,
        }
    }

    fn pid(id: &str) -> ProviderId {
        ProviderId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_authorize_end_to_end() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        f.session
            .vault()
            .save_key(&pid("openAI"), "sk-test-123")
            .await
            .unwrap();

        let headers = f.session.authorize(&pid("openAI")).await.unwrap();

        let authenticator =
            RequestAuthenticator::new(f.registry.clone(), Arc::new(RustCryptoProvider::new()));
        let plaintext = authenticator
            .authenticate(&headers, f.clock.now())
            .await
            .unwrap();
        assert_eq!(plaintext.as_slice(), b"sk-test-123");
    }

    #[tokio::test]
    async fn test_reset_clears_session_and_vault() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        f.session
            .vault()
            .save_key(&pid("openAI"), "sk-test-123")
            .await
            .unwrap();
        assert!(f.session.relay().active_session().await.is_some());

        f.session.reset().await.unwrap();

        let status = f.session.status().await.unwrap();
        assert_eq!(status.vault, VaultState::NoVault);
        assert!(status.providers.is_empty());
        assert!(status.session.is_none());
        assert!(f
            .session
            .relay()
            .get_session_headers(b"sk-test-123")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unlock_establishes_session() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        f.session.lock().await;

        let status = f.session.status().await.unwrap();
        assert_eq!(status.vault, VaultState::Locked);
        assert!(status.session.is_none());

        let id = f.session.unlock(b"longpassphrase1").await.unwrap();
        let status = f.session.status().await.unwrap();
        assert_eq!(status.vault, VaultState::Unlocked);
        assert_eq!(status.session.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_no_session() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        f.session.lock().await;

        assert!(matches!(
            f.session.unlock(b"wrong").await,
            Err(Error::InvalidPassphrase)
        ));
        assert!(f.session.relay().active_session().await.is_none());
        assert_eq!(f.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_authorize_missing_key() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        assert!(matches!(
            f.session.authorize(&pid("openAI")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_authorize_locked() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        f.session.vault().save_key(&pid("openAI"), "sk").await.unwrap();
        f.session.lock().await;

        assert!(matches!(
            f.session.authorize(&pid("openAI")).await,
            Err(Error::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_authorize_renews_expired_session() {
        let f = fixture();
        let first = f.session.create(b"longpassphrase1").await.unwrap();
        f.session.vault().save_key(&pid("openAI"), "sk").await.unwrap();

        f.clock.advance(Duration::from_secs(61));
        let headers = f.session.authorize(&pid("openAI")).await.unwrap();

        assert_ne!(headers.session_id(), Some(first.as_str()));
        assert_eq!(f.registry.len().await, 2);
    }

    /// Registry that refuses every session.
    struct RefusingRegistry;

    #[async_trait]
    impl SessionRegistry for RefusingRegistry {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn save(&self, _id: &SessionId, _secret: &str) -> Result<SaveResponse> {
            Ok(SaveResponse { ok: false })
        }

        async fn resolve(&self, _id: &SessionId) -> Result<Option<ResolvedSession>> {
            Ok(None)
        }

        async fn prune(&self, _now_ms: i64) -> Result<PruneResponse> {
            Ok(PruneResponse { removed_count: 0 })
        }
    }

    #[tokio::test]
    async fn test_registration_failure_keeps_vault_unlocked() {
        let session = VaultSession::open(
            "memory",
            Value::Null,
            VaultOptions::new().with_iterations(ITERATIONS),
            Arc::new(RefusingRegistry),
            RelayConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            session.create(b"longpassphrase1").await,
            Err(Error::SessionRegistrationFailed(_))
        ));
        assert!(session.vault().is_unlocked().await);
        assert!(session.relay().active_session().await.is_none());
    }

    #[tokio::test]
    async fn test_unlock_cancelled() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        f.session.lock().await;

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            f.session.unlock_cancellable(b"longpassphrase1", &token).await,
            Err(Error::Cancelled)
        ));
        assert!(!f.session.vault().is_unlocked().await);
        assert!(f.session.relay().active_session().await.is_none());
    }

    #[tokio::test]
    async fn test_unlock_cancellable_completes() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        f.session.lock().await;

        let token = CancellationToken::new();
        f.session
            .unlock_cancellable(b"longpassphrase1", &token)
            .await
            .unwrap();
        assert!(f.session.vault().is_unlocked().await);
    }

    #[tokio::test]
    async fn test_drop_locks_shared_vault() {
        let f = fixture();
        f.session.create(b"longpassphrase1").await.unwrap();
        let vault = f.session.vault.clone();
        let relay = f.session.relay.clone();

        drop(f.session);

        assert!(!vault.is_unlocked().await);
        assert!(relay.active_session().await.is_none());
    }

    #[tokio::test]
    async fn test_open_local_store() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = RelayConfig::default();
        let registry = Arc::new(MemorySessionRegistry::new(&config).unwrap());

        let session = VaultSession::open(
            "local",
            serde_json::json!({ "root": temp.path() }),
            VaultOptions::new().with_iterations(ITERATIONS),
            registry.clone(),
            config,
        )
        .unwrap();
        session.create(b"longpassphrase1").await.unwrap();
        session.vault().save_key(&pid("openAI"), "sk-test-123").await.unwrap();
        drop(session);

        let reopened = VaultSession::open(
            "local",
            serde_json::json!({ "root": temp.path() }),
            VaultOptions::new().with_iterations(ITERATIONS),
            registry,
            config,
        )
        .unwrap();
        assert_eq!(reopened.status().await.unwrap().vault, VaultState::Locked);
        reopened.unlock(b"longpassphrase1").await.unwrap();
        assert_eq!(
            reopened
                .vault()
                .get_key(&pid("openAI"))
                .await
                .unwrap()
                .unwrap()
                .as_str(),
            "sk-test-123"
        );
    }

    #[test]
    fn test_open_unknown_store() {
        let config = RelayConfig::default();
        let result = VaultSession::open(
            "cloud",
            Value::Null,
            VaultOptions::default(),
            Arc::new(MemorySessionRegistry::new(&config).unwrap()),
            config,
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
