//! Runtime configuration
//!
//! Built from defaults and the command line (which also reads
//! `QUOTECACHE_DATA_DIR` / `QUOTECACHE_BASE_URL`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::api::{
    EndpointRegistry, FetchError, QuoteClient, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT,
};
use crate::cli::Cli;
use crate::orchestrator::{CacheOrchestrator, CACHE_TTL};
use crate::storage::FileStorage;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `--data-dir` nor a home directory is available
    #[error("Could not determine a data directory; pass --data-dir or set QUOTECACHE_DATA_DIR")]
    NoDataDir,

    #[error(transparent)]
    Client(#[from] FetchError),
}

/// Settings needed to assemble a [`CacheOrchestrator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Provider host, without the `/query` path
    pub base_url: String,
    /// Where cached responses and the credential are persisted
    pub data_dir: PathBuf,
    /// Freshness window for cached responses
    pub ttl: Duration,
    pub request_timeout: Duration,
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir,
            ttl: CACHE_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Defaults in the platform data directory
    pub fn from_env() -> Result<Self, ConfigError> {
        FileStorage::default_dir()
            .map(Self::with_data_dir)
            .ok_or(ConfigError::NoDataDir)
    }

    /// Applies command-line overrides on top of the defaults
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.data_dir {
            Some(dir) => Self::with_data_dir(dir.clone()),
            None => Self::from_env()?,
        };
        if let Some(base_url) = &cli.base_url {
            config.base_url = base_url.clone();
        }
        Ok(config)
    }

    /// Assembles the file-backed orchestrator this configuration describes
    pub fn build_orchestrator(&self) -> Result<CacheOrchestrator, ConfigError> {
        let storage = Arc::new(FileStorage::with_dir(self.data_dir.clone()));
        let client = QuoteClient::with_timeout(
            EndpointRegistry::new(self.base_url.clone()),
            self.request_timeout,
        )?;
        Ok(CacheOrchestrator::builder(client, storage)
            .ttl(self.ttl)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = Config::with_data_dir(PathBuf::from("/tmp/qc"));
        assert_eq!(config.base_url, "https://www.alphavantage.co");
        assert_eq!(config.ttl, Duration::from_secs(2400));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_cli_overrides() {
        let cli = Cli::parse_from([
            "quotecache",
            "--data-dir",
            "/tmp/qc",
            "--base-url",
            "http://127.0.0.1:9999",
            "cache",
            "clear",
        ]);

        let config = Config::from_cli(&cli).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/qc"));
        assert_eq!(config.base_url, "http://127.0.0.1:9999");
    }

    #[test]
    fn test_build_orchestrator_uses_configured_ttl() {
        let mut config = Config::with_data_dir(PathBuf::from("/tmp/qc"));
        config.ttl = Duration::from_secs(5);

        assert_eq!(config.build_orchestrator().unwrap().ttl(), Duration::from_secs(5));
    }
}
