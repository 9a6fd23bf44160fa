//! PyJIT - run untrusted scripts against fetched data
//!
//! Usage:
//!   pyjit --host 127.0.0.1 --port 5000
//!
//! Then `POST /execute` with the script as the body and a `Data-URL` header.

use anyhow::Context;
use clap::Parser;
use pyjit_core::{ExecutionService, ServiceConfig, StagingConfig};
use pyjit_sandbox::ExecutionLimits;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pyjit")]
#[command(author = "HeyBattle1")]
#[command(version)]
#[command(about = "Run untrusted scripts against fetched data", long_about = None)]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Directory for staged data (defaults to the system temp dir)
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Largest data source body accepted, in bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    max_data_bytes: u64,

    /// Timeout for fetching the data source
    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,

    /// Interpreter step budget per invocation
    #[arg(long, default_value_t = 10_000_000)]
    max_steps: u64,

    /// Maximum nested function calls
    #[arg(long, default_value_t = 64)]
    max_call_depth: usize,

    /// Wall-clock budget per invocation
    #[arg(long, default_value_t = 30)]
    exec_timeout_secs: u64,
}

impl Cli {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            staging: StagingConfig {
                dir: self.staging_dir.clone(),
                max_data_bytes: self.max_data_bytes,
                fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            },
            limits: ExecutionLimits {
                max_steps: self.max_steps,
                max_call_depth: self.max_call_depth,
                timeout: Duration::from_secs(self.exec_timeout_secs),
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let service = ExecutionService::new(cli.service_config())
        .context("Failed to build the data source client")?;

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    pyjit_server::serve(listener, Arc::new(service), shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["pyjit"]);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 5000);

        let config = cli.service_config();
        assert_eq!(config.staging.max_data_bytes, 64 * 1024 * 1024);
        assert_eq!(config.limits.max_steps, 10_000_000);
        assert_eq!(config.limits.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "pyjit",
            "--port",
            "8080",
            "--staging-dir",
            "/var/lib/pyjit",
            "--max-steps",
            "500",
            "--exec-timeout-secs",
            "2",
        ]);
        let config = cli.service_config();
        assert_eq!(cli.port, 8080);
        assert_eq!(config.staging.dir, Some(PathBuf::from("/var/lib/pyjit")));
        assert_eq!(config.limits.max_steps, 500);
        assert_eq!(config.limits.timeout, Duration::from_secs(2));
    }
}
