//! Resource stager
//!
//! Fetches the caller's data once and parks it in a uniquely named temp
//! file. The file is owned by a [`StagedResource`] and deleted on
//! `release()` or on drop, whichever comes first, so cancellation of the
//! invocation cannot leak it.

use crate::config::StagingConfig;
use crate::fetch::Fetch;
use chrono::{DateTime, Utc};
use pyjit_sandbox::DataHandle;
use std::io::{self, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;
use url::Url;

/// Prefix of every staged file name. The rest of the name is random.
pub const STAGED_FILE_PREFIX: &str = "pyjit-";

/// Reasons staging can fail. No variant ever carries a local path.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Missing Data-URL header")]
    MissingUrl,

    #[error("Invalid data URL: {0}")]
    InvalidUrl(String),

    #[error("Data source responded with status {0}")]
    Status(u16),

    #[error("Failed to reach data source: {0}")]
    Transport(String),

    #[error("Data exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("Failed to stage data: {0}")]
    Storage(io::ErrorKind),
}

impl FetchError {
    fn storage(e: io::Error) -> Self {
        FetchError::Storage(e.kind())
    }
}

/// Parse and check a data URL. Only absolute http(s) URLs are accepted.
pub fn parse_data_url(raw: Option<&str>) -> Result<Url, FetchError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(FetchError::MissingUrl)?;
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            other
        ))),
    }
}

/// Fetched data parked on local storage for one invocation
#[derive(Debug)]
pub struct StagedResource {
    file: Option<NamedTempFile>,
    byte_length: u64,
    created_at: DateTime<Utc>,
}

impl StagedResource {
    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_released(&self) -> bool {
        self.file.is_none()
    }

    /// Handle for binding into a capability environment, until released.
    pub fn handle(&self) -> Option<DataHandle> {
        self.file
            .as_ref()
            .map(|file| DataHandle::new(file.path(), self.byte_length))
    }

    /// Delete the staged file. Safe to call any number of times.
    pub fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        match file.close() {
            Ok(()) => tracing::debug!("staged data released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(kind = ?e.kind(), "failed to delete staged data"),
        }
    }
}

impl Drop for StagedResource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fetches data sources and stages them
pub struct ResourceStager {
    fetcher: Arc<dyn Fetch>,
    config: StagingConfig,
}

impl ResourceStager {
    pub fn new(fetcher: Arc<dyn Fetch>, config: StagingConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Fetch `url` and stage its body. Nothing is written unless the fetch succeeds.
    pub async fn stage(&self, url: Option<&str>) -> Result<StagedResource, FetchError> {
        let url = parse_data_url(url)?;
        let body = self.fetcher.fetch(&url, self.config.max_data_bytes).await?;
        let dir = self.config.staging_dir();

        let file = tokio::task::spawn_blocking(move || -> io::Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix(STAGED_FILE_PREFIX)
                .tempfile_in(dir)?;
            file.write_all(&body)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|_| FetchError::Storage(io::ErrorKind::Other))?
        .map_err(FetchError::storage)?;

        let byte_length = file
            .as_file()
            .metadata()
            .map_err(FetchError::storage)?
            .len();
        tracing::debug!(byte_length, "data staged");

        Ok(StagedResource {
            file: Some(file),
            byte_length,
            created_at: Utc::now(),
        })
    }
}
