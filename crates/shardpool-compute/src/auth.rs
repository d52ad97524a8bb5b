//! Bearer-token acquisition for the compute API.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ComputeError;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where the API bearer token comes from.
///
/// Static tokens and token files are read as-is; the metadata server
/// variant fetches (and caches until shortly before expiry) an access
/// token from the GCE instance metadata service.
pub enum TokenSource {
    Static(String),
    File(String),
    Metadata {
        client: reqwest::Client,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

impl TokenSource {
    pub fn statik(token: &str) -> Self {
        TokenSource::Static(token.to_string())
    }

    pub fn file(path: &str) -> Self {
        TokenSource::File(path.to_string())
    }

    pub fn metadata() -> Result<Self, ComputeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(TokenSource::Metadata {
            client,
            cached: Mutex::new(None),
        })
    }

    /// Current bearer token.
    pub async fn token(&self) -> Result<String, ComputeError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::File(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ComputeError::Auth(format!("reading {path}: {e}")))?;
                Ok(raw.trim().to_string())
            }
            TokenSource::Metadata { client, cached } => {
                let mut guard = cached.lock().await;
                if let Some((token, expires_at)) = guard.as_ref()
                    && Instant::now() < *expires_at
                {
                    return Ok(token.clone());
                }

                let resp = client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(ComputeError::Auth(format!(
                        "metadata server returned status {}",
                        resp.status()
                    )));
                }
                let token: MetadataToken = resp.json().await?;

                // Refresh a minute early so in-flight calls never
                // carry a token about to expire.
                let ttl = token.expires_in.saturating_sub(60);
                let expires_at = Instant::now() + Duration::from_secs(ttl);
                debug!(ttl_secs = ttl, "refreshed metadata access token");
                *guard = Some((token.access_token.clone(), expires_at));
                Ok(token.access_token)
            }
        }
    }
}
