//! Cache-aside retrieval
//!
//! [`CacheOrchestrator`] is the entry point callers use. A lookup derives the
//! canonical key, serves a fresh entry straight from the store, and otherwise
//! goes to the provider:
//!
//! - data is stored with its fetch time and returned
//! - "no data" (`null`/`{}`) is returned as `None` and never stored
//! - a soft failure is published on the advisory channel and returned as
//!   `None`; any stale entry is left in place
//! - hard failures are returned as errors and nothing is stored
//!
//! Concurrent lookups of the same key share one provider call. The call runs
//! as its own task, so it completes and stores its result even if every
//! caller stops waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::api::{Advisory, FetchError, FetchOutcome, Operation, QuoteClient, Request};
use crate::cache::{CacheEntry, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::credential::{Credential, CredentialError, CredentialStore};
use crate::storage::{Storage, StorageError};

/// How long a cached response is served before the provider is asked again
pub const CACHE_TTL: Duration = Duration::from_secs(40 * 60);

/// Buffered advisories per subscriber before the oldest are dropped
const ADVISORY_CAPACITY: usize = 16;

type SharedFetch = Shared<BoxFuture<'static, Result<Option<Value>, FetchError>>>;

/// Errors from the orchestrator's state-changing operations
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("failed to clear cache: {0}")]
    Storage(#[from] StorageError),
}

/// Coordinates the cache, the credential and the provider client
///
/// Cheap to clone; clones share the in-flight registry and advisory channel.
#[derive(Clone)]
pub struct CacheOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    client: QuoteClient,
    cache: CacheStore,
    credentials: CredentialStore,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    advisories: broadcast::Sender<Advisory>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    /// Bumped on every invalidation; fetches started earlier don't write back
    generation: AtomicU64,
    /// Cache writes hold it shared, invalidation exclusively
    write_gate: RwLock<()>,
}

/// Configures a [`CacheOrchestrator`]
pub struct OrchestratorBuilder {
    client: QuoteClient,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl OrchestratorBuilder {
    /// Replace the wall clock, e.g. with a [`ManualClock`](crate::clock::ManualClock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn build(self) -> CacheOrchestrator {
        let (advisories, _) = broadcast::channel(ADVISORY_CAPACITY);
        CacheOrchestrator {
            inner: Arc::new(Inner {
                client: self.client,
                cache: CacheStore::new(self.storage.clone()),
                credentials: CredentialStore::new(self.storage),
                clock: self.clock,
                ttl: self.ttl,
                advisories,
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                write_gate: RwLock::new(()),
            }),
        }
    }
}

impl CacheOrchestrator {
    /// Create an orchestrator with the wall clock and the standard TTL
    pub fn new(client: QuoteClient, storage: Arc<dyn Storage>) -> Self {
        Self::builder(client, storage).build()
    }

    pub fn builder(client: QuoteClient, storage: Arc<dyn Storage>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            client,
            storage,
            clock: Arc::new(SystemClock),
            ttl: CACHE_TTL,
        }
    }

    /// Fetch an operation's payload, serving fresh cached data when present
    ///
    /// # Returns
    /// * `Ok(Some(payload))` - Fresh cached data or a successful fetch
    /// * `Ok(None)` - No usable data: the provider had none, or reported a
    ///   rate limit / premium block (published via [`subscribe`](Self::subscribe))
    /// * `Err(FetchError)` - The fetch could not be completed at all
    pub async fn fetch_with_cache<I, K, V>(
        &self,
        operation: &str,
        params: I,
    ) -> Result<Option<Value>, FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let operation: Operation = operation.parse()?;
        let request = Request::resolve(operation, params)?;
        self.fetch_request(request).await
    }

    /// [`fetch_with_cache`](Self::fetch_with_cache) for an already resolved request
    pub async fn fetch_request(&self, request: Request) -> Result<Option<Value>, FetchError> {
        let key = request.cache_key();

        if let Some(data) = self.inner.fresh(&key).await {
            debug!(key = %key, "cache hit");
            return Ok(Some(data));
        }

        let pending = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&key) {
                Some(pending) => {
                    debug!(key = %key, "joining in-flight fetch");
                    pending.clone()
                }
                None => {
                    let pending = Inner::start_load(self.inner.clone(), request, key.clone());
                    in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Remove every cached entry; the credential record is untouched
    ///
    /// Waits for cache writes already under way, so none of them lands after
    /// the wipe.
    pub async fn invalidate_all(&self) -> Result<usize, StorageError> {
        let _gate = self.inner.write_gate.write().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.cache.wipe_all().await
    }

    /// Make `credential` the active identity and clear the cache
    pub async fn rotate_credential(&self, credential: &Credential) -> Result<(), OrchestratorError> {
        self.inner.credentials.set(credential).await?;
        self.finish_rotation(credential.is_demo()).await
    }

    /// Parse and rotate to a user-entered key (`demo` selects the demo identity)
    pub async fn set_credential(&self, raw: &str) -> Result<(), OrchestratorError> {
        let credential = Credential::parse(raw)?;
        self.rotate_credential(&credential).await
    }

    /// Return to the demo identity and clear the cache
    pub async fn reset_credential(&self) -> Result<(), OrchestratorError> {
        self.inner.credentials.reset_to_default().await?;
        self.finish_rotation(true).await
    }

    async fn finish_rotation(&self, demo: bool) -> Result<(), OrchestratorError> {
        let removed = self.invalidate_all().await?;
        info!(demo, removed, "credential rotated");
        Ok(())
    }

    pub async fn current_credential(&self) -> Credential {
        self.inner.credentials.current().await
    }

    /// Receive advisories raised by soft failures from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Advisory> {
        self.inner.advisories.subscribe()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}

impl std::fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("client", &self.inner.client)
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// The cached payload for `key` if it is still within the TTL
    async fn fresh(&self, key: &str) -> Option<Value> {
        let entry = self.cache.get(key).await?;
        if entry.is_fresh_at(self.clock.now_millis(), self.ttl) {
            Some(entry.data)
        } else {
            debug!(key, fetched_at = entry.fetched_at, "cache entry stale");
            None
        }
    }

    /// Spawns a load and returns a shareable handle to its result
    ///
    /// Must be called with the in-flight lock held, so the task's
    /// deregistration always follows the caller's registration.
    fn start_load(inner: Arc<Inner>, request: Request, key: String) -> SharedFetch {
        // Invalidations from here on make the result unstorable
        let generation = inner.generation.load(Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let _registration = InFlightRegistration {
                inner: inner.clone(),
                key: key.clone(),
            };
            inner.load(&request, &key, generation).await
        });
        async move {
            task.await
                .unwrap_or_else(|err| Err(FetchError::Task(Arc::new(err))))
        }
        .boxed()
        .shared()
    }

    async fn load(
        &self,
        request: &Request,
        key: &str,
        generation: u64,
    ) -> Result<Option<Value>, FetchError> {
        // A concurrent caller may have stored the entry since our first lookup
        if let Some(data) = self.fresh(key).await {
            return Ok(Some(data));
        }

        let credential = self.credentials.current().await;

        let outcome = match self.client.fetch_request(request, &credential).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(key, error = %err, "provider fetch failed");
                return Err(err);
            }
        };

        match outcome {
            FetchOutcome::Data(data) => {
                self.store(key, &data, generation).await;
                Ok(Some(data))
            }
            FetchOutcome::NoData => {
                debug!(key, "provider returned no data, not caching");
                Ok(None)
            }
            FetchOutcome::SoftFailure(advisory) => {
                warn!(key, kind = %advisory.kind, message = %advisory.message, "provider advisory");
                // No subscribers is fine
                let _ = self.advisories.send(advisory);
                Ok(None)
            }
        }
    }

    async fn store(&self, key: &str, data: &Value, generation: u64) {
        let _gate = self.write_gate.read().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(key, "cache invalidated during fetch, not storing result");
            return;
        }
        let Some(entry) = CacheEntry::new(data.clone(), self.clock.now_millis()) else {
            return;
        };
        if let Err(err) = self.cache.set(key, &entry).await {
            warn!(key, error = %err, "failed to write cache entry");
        }
    }
}

/// Removes a key's in-flight entry when its load task ends, even by panic
struct InFlightRegistration {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for InFlightRegistration {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
