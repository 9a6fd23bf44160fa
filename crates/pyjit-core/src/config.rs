//! Service configuration

use pyjit_sandbox::ExecutionLimits;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for fetching and staging data
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// Directory for staged files. `None` means the system temp dir.
    pub dir: Option<PathBuf>,
    /// Largest response body accepted from a data source
    pub max_data_bytes: u64,
    /// Timeout for the whole fetch, connect included
    pub fetch_timeout: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_data_bytes: 64 * 1024 * 1024, // 64MB
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl StagingConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Configuration for the execution service
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub staging: StagingConfig,
    pub limits: ExecutionLimits,
}
