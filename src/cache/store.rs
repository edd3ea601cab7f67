//! Persistent response cache
//!
//! Entries are stored in a shared [`Storage`] under the reserved
//! [`CACHE_KEY_PREFIX`] namespace. Stale entries are never physically
//! evicted here; freshness is decided by the reader.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::key::CACHE_KEY_PREFIX;
use crate::storage::{Storage, StorageError};

/// A cached provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The provider's parsed response body
    pub data: Value,
    /// Epoch milliseconds of the fetch that produced `data`
    pub fetched_at: i64,
}

impl CacheEntry {
    /// Wraps a payload; returns `None` for a JSON `null`, which is never cached
    pub fn new(data: Value, fetched_at: i64) -> Option<Self> {
        if data.is_null() {
            return None;
        }
        Some(Self { data, fetched_at })
    }

    /// Whether the entry is younger than `ttl` at `now` (epoch milliseconds)
    pub fn is_fresh_at(&self, now: i64, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(self.fetched_at) < ttl_ms
    }
}

/// Reads and writes [`CacheEntry`] values through a [`Storage`] backend
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn Storage>,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Looks up an entry
    ///
    /// Storage failures and undecodable entries are logged and reported as a
    /// miss, so a damaged cache degrades to the network instead of failing.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let value = match self.storage.get(key).await {
            Ok(value) => value?,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_value::<CacheEntry>(value) {
            Ok(entry) if !entry.data.is_null() => Some(entry),
            Ok(_) => None,
            Err(err) => {
                warn!(key, error = %err, "cache entry has unexpected shape, treating as miss");
                None
            }
        }
    }

    /// Stores `entry` under `key`, replacing any previous entry
    pub async fn set(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        let value = serde_json::to_value(entry)?;
        self.storage.set(key, &value).await
    }

    /// Removes every entry in the cache namespace, leaving other keys alone
    pub async fn wipe_all(&self) -> Result<usize, StorageError> {
        let removed = self.storage.remove_by_prefix(CACHE_KEY_PREFIX).await?;
        info!(removed, "cache cleared");
        Ok(removed)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}
