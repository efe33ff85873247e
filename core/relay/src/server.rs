//! Server side of the session relay: turns request headers back into the
//! provider key.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::registry::SessionRegistry;
use crate::relay::SessionHeaders;
use keyrelay_common::{Error, Result, SessionId};
use keyrelay_crypto::{encoding, CryptoProvider, SessionSecret, KEY_LENGTH};

/// Authenticates relayed requests against a session registry.
///
/// Any error from `authenticate` means the request is unauthenticated.
pub struct RequestAuthenticator {
    registry: Arc<dyn SessionRegistry>,
    crypto: Arc<dyn CryptoProvider>,
}

impl RequestAuthenticator {
    /// Create an authenticator.
    pub fn new(registry: Arc<dyn SessionRegistry>, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { registry, crypto }
    }

    /// Recover the sealed provider key from request headers.
    ///
    /// # Errors
    /// - `NotFound` if the session id header is missing or unknown
    /// - `SessionExpired` if the session's expiry is at or before `now`
    /// - `DecryptionFailed` if the auth header is missing, malformed, or does
    ///   not open under the session secret
    pub async fn authenticate(
        &self,
        headers: &SessionHeaders,
        now: DateTime<Utc>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let session_id = headers
            .session_id()
            .and_then(|id| SessionId::parse(id).ok())
            .ok_or_else(|| Error::NotFound("Missing session id".to_string()))?;

        let session = self
            .registry
            .resolve(&session_id)
            .await?
            .ok_or_else(|| {
                debug!(session_id = %session_id, "Unknown session");
                Error::NotFound(format!("Unknown session {}", session_id))
            })?;

        if session.expires_at <= now.timestamp_millis() {
            debug!(session_id = %session_id, "Session expired");
            return Err(Error::SessionExpired);
        }

        let mut secret_bytes = encoding::decode_array::<KEY_LENGTH>(&session.secret)
            .map_err(|_| Error::Crypto("Registry holds a malformed session secret".to_string()))?;
        let secret = SessionSecret::from_bytes(secret_bytes);
        secret_bytes.zeroize();

        let sealed = headers
            .auth()
            .ok_or(Error::DecryptionFailed)
            .and_then(|auth| encoding::decode(auth).map_err(|_| Error::DecryptionFailed))?;

        self.crypto.open(&secret, &sealed).inspect_err(|_| {
            warn!(session_id = %session_id, "Request payload failed authentication");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::RelayConfig;
    use crate::registry::MemorySessionRegistry;
    use crate::relay::{SessionRelay, SESSION_AUTH_HEADER, SESSION_ID_HEADER};
    use keyrelay_crypto::{RawKeyMaterial, RustCryptoProvider};
    use std::time::Duration;

    struct Fixture {
        clock: ManualClock,
        relay: SessionRelay,
        authenticator: RequestAuthenticator,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let config = RelayConfig::new().with_session_ttl(Duration::from_secs(60));
        let crypto = Arc::new(RustCryptoProvider::new());
        let registry = Arc::new(
            MemorySessionRegistry::with_clock(&config, Arc::new(clock.clone())).unwrap(),
        );

        let relay = SessionRelay::new(registry.clone(), crypto.clone(), config)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let authenticator = RequestAuthenticator::new(registry, crypto);

        Fixture {
            clock,
            relay,
            authenticator,
        }
    }

    fn raw() -> RawKeyMaterial {
        RawKeyMaterial::from_bytes([3u8; KEY_LENGTH])
    }

    #[tokio::test]
    async fn test_relay_headers_authenticate() {
        let f = fixture();
        f.relay.ensure_session(&raw()).await.unwrap();
        let headers = f.relay.get_session_headers(b"sk-test-123").await.unwrap();

        let plaintext = f
            .authenticator
            .authenticate(&headers, f.clock.now())
            .await
            .unwrap();
        assert_eq!(plaintext.as_slice(), b"sk-test-123");
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let f = fixture();
        f.relay.ensure_session(&raw()).await.unwrap();
        let headers = f.relay.get_session_headers(b"sk").await.unwrap();

        f.clock.advance(Duration::from_secs(60));
        assert!(matches!(
            f.authenticator.authenticate(&headers, f.clock.now()).await,
            Err(Error::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let f = fixture();
        f.relay.ensure_session(&raw()).await.unwrap();
        let mut headers = f.relay.get_session_headers(b"sk").await.unwrap();
        headers.insert(SESSION_ID_HEADER, SessionId::generate().as_str());

        assert!(matches!(
            f.authenticator.authenticate(&headers, f.clock.now()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_headers_rejected() {
        let f = fixture();
        assert!(matches!(
            f.authenticator
                .authenticate(&SessionHeaders::empty(), f.clock.now())
                .await,
            Err(Error::NotFound(_))
        ));

        let id = f.relay.ensure_session(&raw()).await.unwrap();
        let only_id: SessionHeaders = [(SESSION_ID_HEADER, id.as_str())].into_iter().collect();
        assert!(matches!(
            f.authenticator.authenticate(&only_id, f.clock.now()).await,
            Err(Error::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let f = fixture();
        f.relay.ensure_session(&raw()).await.unwrap();
        let mut headers = f.relay.get_session_headers(b"sk-test-123").await.unwrap();

        let mut sealed = encoding::decode(headers.auth().unwrap()).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        headers.insert(SESSION_AUTH_HEADER, encoding::encode(&sealed));

        assert!(matches!(
            f.authenticator.authenticate(&headers, f.clock.now()).await,
            Err(Error::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_garbage_payload_rejected() {
        let f = fixture();
        f.relay.ensure_session(&raw()).await.unwrap();
        let mut headers = f.relay.get_session_headers(b"sk").await.unwrap();

        headers.insert(SESSION_AUTH_HEADER, "not base64!!");
        assert!(matches!(
            f.authenticator.authenticate(&headers, f.clock.now()).await,
            Err(Error::DecryptionFailed)
        ));

        headers.insert(SESSION_AUTH_HEADER, encoding::encode(&[1u8; 10]));
        assert!(matches!(
            f.authenticator.authenticate(&headers, f.clock.now()).await,
            Err(Error::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_headers_from_other_session_rejected() {
        let a = fixture();
        let b = fixture();
        a.relay.ensure_session(&raw()).await.unwrap();
        let headers = a.relay.get_session_headers(b"sk").await.unwrap();

        // b's registry has never seen a's session.
        assert!(matches!(
            b.authenticator.authenticate(&headers, b.clock.now()).await,
            Err(Error::NotFound(_))
        ));
    }
}
