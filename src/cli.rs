//! Command-line interface parsing for quotecache
//!
//! This module handles parsing of CLI arguments using clap: global flags for
//! the provider host and state directory, and subcommands for fetching,
//! credential management and cache maintenance.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::api::Operation;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A parameter was not written as NAME=VALUE
    #[error("Invalid parameter: '{0}'. Expected NAME=VALUE, e.g. symbol=IBM")]
    InvalidParam(String),

    /// The operation name is not one the provider supports
    #[error("Invalid operation: '{0}'. Valid operations: {1}")]
    InvalidOperation(String, String),
}

/// quotecache - cached access to market quote data
#[derive(Parser, Debug)]
#[command(name = "quotecache")]
#[command(about = "Cache-aside client for market quote data")]
#[command(version)]
pub struct Cli {
    /// Directory holding the cache and the active credential
    #[arg(long, global = true, env = "QUOTECACHE_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Provider base URL
    #[arg(long, global = true, env = "QUOTECACHE_BASE_URL", value_name = "URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch an operation, serving cached data while it is fresh
    ///
    /// Examples:
    ///   quotecache fetch companyOverview symbol=IBM
    ///   quotecache fetch intradayTimeSeries symbol=IBM interval=15min
    ///   quotecache fetch topGainersLosers
    Fetch {
        /// topGainersLosers, companyOverview, tickerSearch, dailyTimeSeries,
        /// monthlyTimeSeries or intradayTimeSeries
        #[arg(value_parser = parse_operation_arg)]
        operation: Operation,

        /// Operation parameters as NAME=VALUE
        #[arg(value_parser = parse_param_arg)]
        params: Vec<(String, String)>,
    },

    /// Show or change the provider API key
    #[command(subcommand)]
    Credential(CredentialCommand),

    /// Manage the response cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CredentialCommand {
    /// Print the active key (`demo` for the demo identity)
    Show,
    /// Use your own API key; clears the cache
    Set {
        /// The API key
        key: String,
    },
    /// Switch back to the demo key; clears the cache
    Reset,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CacheCommand {
    /// Remove every cached response
    Clear,
}

/// Parses a `NAME=VALUE` parameter argument
///
/// # Returns
/// * `Ok((name, value))` if the argument has a non-empty name and an `=`
/// * `Err(CliError::InvalidParam)` otherwise
pub fn parse_param_arg(s: &str) -> Result<(String, String), CliError> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(CliError::InvalidParam(s.to_string())),
    }
}

/// Parses an operation name argument into an [`Operation`]
pub fn parse_operation_arg(s: &str) -> Result<Operation, CliError> {
    s.parse().map_err(|_| {
        let valid: Vec<&str> = Operation::ALL.iter().map(|op| op.name()).collect();
        CliError::InvalidOperation(s.to_string(), valid.join(", "))
    })
}
