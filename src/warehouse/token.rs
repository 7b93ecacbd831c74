//! OAuth bearer tokens for the warehouse API.

use crate::error::LoadError;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the metadata server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum TokenSource {
    /// A fixed token, typically injected through the environment.
    Static(String),
    /// The GCE metadata server of the host the service runs on.
    Metadata {
        url: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    token: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl TokenSource {
    pub fn fixed(token: impl Into<String>) -> Self {
        TokenSource::Static(token.into())
    }

    pub fn metadata(url: impl Into<String>) -> Self {
        TokenSource::Metadata {
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn metadata_default() -> Self {
        Self::metadata(DEFAULT_METADATA_TOKEN_URL)
    }

    pub async fn token(&self, http: &reqwest::Client) -> Result<String, LoadError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata { url, cached } => {
                let mut cached = cached.lock().await;
                if let Some(entry) = cached.as_ref() {
                    if Instant::now() < entry.refresh_at {
                        return Ok(entry.token.clone());
                    }
                }

                let fresh = fetch_metadata_token(http, url).await?;
                let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
                tracing::debug!(expires_in = fresh.expires_in, "refreshed warehouse access token");
                *cached = Some(CachedToken {
                    token: fresh.access_token.clone(),
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(fresh.access_token)
            }
        }
    }
}

async fn fetch_metadata_token(
    http: &reqwest::Client,
    url: &str,
) -> Result<MetadataToken, LoadError> {
    let response = http
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|err| LoadError::Credentials(format!("metadata server unreachable: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LoadError::Credentials(format!(
            "metadata server returned {status}: {body}"
        )));
    }

    response
        .json::<MetadataToken>()
        .await
        .map_err(|err| LoadError::Credentials(format!("malformed metadata token: {err}")))
}
