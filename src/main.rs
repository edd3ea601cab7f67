//! quotecache - cached access to market quote data
//!
//! Fetches provider data through the cache-aside layer and manages the
//! active API key. Payloads go to stdout as JSON; logs and notices go to
//! stderr.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quotecache::api::Request;
use quotecache::cli::{CacheCommand, Cli, Command, CredentialCommand};
use quotecache::config::Config;
use quotecache::CacheOrchestrator;

/// Installs the stderr log subscriber; `RUST_LOG` overrides the default filter
fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "quotecache=info".into()),
        )
        .init();
}

async fn run_credential(
    quotes: &CacheOrchestrator,
    command: CredentialCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        CredentialCommand::Show => {
            println!("{}", quotes.current_credential().await);
        }
        CredentialCommand::Set { key } => {
            quotes.set_credential(&key).await?;
            println!("API key updated; cache cleared");
        }
        CredentialCommand::Reset => {
            quotes.reset_credential().await?;
            println!("Using demo API key; cache cleared");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;
    let quotes = config.build_orchestrator()?;

    match cli.command {
        Command::Fetch { operation, params } => {
            let mut advisories = quotes.subscribe();
            let request = Request::resolve(operation, params)?;
            match quotes.fetch_request(request).await? {
                Some(payload) => {
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                }
                None => {
                    while let Ok(advisory) = advisories.try_recv() {
                        eprintln!("Provider advisory ({}): {}", advisory.kind, advisory.message);
                    }
                    eprintln!("No data available for {}", operation);
                }
            }
        }
        Command::Credential(command) => run_credential(&quotes, command).await?,
        Command::Cache(CacheCommand::Clear) => {
            let removed = quotes.invalidate_all().await?;
            println!("Removed {} cached responses", removed);
        }
    }

    Ok(())
}
