//! HTTP session registry adapter.
//!
//! Speaks the registry contract as JSON over `POST {base}/sessions/{op}`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::RelayConfig;
use crate::registry::{PruneResponse, ResolvedSession, SaveResponse, SessionRegistry};
use keyrelay_common::{Error, Result, SessionId};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest<'a> {
    session_id: &'a SessionId,
    secret: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest<'a> {
    session_id: &'a SessionId,
}

#[derive(Serialize)]
struct PruneRequest {
    now: i64,
}

/// Session registry reached over HTTP.
pub struct HttpSessionRegistry {
    client: reqwest::Client,
    base: Url,
}

impl HttpSessionRegistry {
    /// Create an adapter for the registry at `base_url`.
    ///
    /// Every request is bounded by `config.request_timeout`.
    ///
    /// # Errors
    /// - `base_url` is not an absolute http(s) URL
    /// - HTTP client construction failed
    pub fn new(base_url: &str, config: &RelayConfig) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid registry URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "Registry URL must be http(s): {}",
                base_url
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base })
    }

    /// Get the normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, op: &str) -> Result<Url> {
        self.base
            .join(&format!("sessions/{}", op))
            .map_err(|e| Error::InvalidInput(format!("Invalid registry endpoint: {}", e)))
    }

    async fn post<B, R>(&self, op: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(op)?)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Registry request failed: {}", e)))?;

        let status = response.status();
        debug!(status = %status, op, "Registry response received");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!("Registry returned {}: {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read registry response: {}", e)))?;
        serde_json::from_str(&body).map_err(|e| {
            Error::Serialization(format!("Failed to parse registry response: {}", e))
        })
    }
}

#[async_trait]
impl SessionRegistry for HttpSessionRegistry {
    fn name(&self) -> &str {
        "http"
    }

    async fn save(&self, session_id: &SessionId, secret: &str) -> Result<SaveResponse> {
        self.post("save", &SaveRequest { session_id, secret }).await
    }

    async fn resolve(&self, session_id: &SessionId) -> Result<Option<ResolvedSession>> {
        self.post("resolve", &ResolveRequest { session_id }).await
    }

    async fn prune(&self, now_ms: i64) -> Result<PruneResponse> {
        self.post("prune", &PruneRequest { now: now_ms }).await
    }
}
