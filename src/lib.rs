//! quotecache library
//!
//! Cache-aside access to a remote quote provider: canonical cache keys, a
//! 40-minute freshness window, credential rotation that clears the cache,
//! and detection of rate-limit / premium advisories hidden in HTTP 200
//! responses.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use quotecache::api::EndpointRegistry;
//! use quotecache::{CacheOrchestrator, FileStorage, QuoteClient};
//!
//! let storage = Arc::new(FileStorage::new().ok_or("no home directory")?);
//! let client = QuoteClient::new(EndpointRegistry::default())?;
//! let quotes = CacheOrchestrator::new(client, storage);
//!
//! match quotes.fetch_with_cache("companyOverview", [("symbol", "IBM")]).await? {
//!     Some(overview) => println!("{}", overview["Name"]),
//!     None => println!("no data (possibly rate limited)"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod credential;
pub mod orchestrator;
pub mod storage;

pub use api::{Advisory, AdvisoryKind, FetchError, Operation, QuoteClient};
pub use cache::{build_key, CacheEntry, CacheStore};
pub use credential::{Credential, CredentialStore};
pub use orchestrator::{CacheOrchestrator, OrchestratorError, CACHE_TTL};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
