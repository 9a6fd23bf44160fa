//! Outbound fetch capability
//!
//! Only the service fetches. Scripts never see this trait or the client.

use crate::stager::FetchError;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Retrieves the bytes behind a data URL
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch `url`, failing with [`FetchError::TooLarge`] past `limit` bytes.
    async fn fetch(&self, url: &Url, limit: u64) -> Result<Vec<u8>, FetchError>;
}

/// [`Fetch`] over HTTP(S) with reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pyjit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url, limit: u64) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length can lie or be absent, so the ceiling is enforced per chunk.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?
        {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
