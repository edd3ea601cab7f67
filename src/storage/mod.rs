//! Persistent key/value storage backing the cache and the credential record
//!
//! Both the cache namespace and the credential singleton live in one
//! `Storage`. Keys are plain strings; values are JSON documents.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a storage backend
///
/// Sources are wrapped in `Arc` so the error can be cloned and handed to
/// every caller waiting on a shared fetch.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("storage I/O failed: {0}")]
    Io(#[from] Arc<std::io::Error>),

    /// A value could not be encoded as JSON
    #[error("failed to serialize stored value: {0}")]
    Serialize(#[from] Arc<serde_json::Error>),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialize(Arc::new(err))
    }
}

/// Async key/value store with read-after-write consistency within a process
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the value stored under `key`, or `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Removes `key`; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Lists every stored key
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Removes every key starting with `prefix` and returns how many were removed
    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let doomed: Vec<String> = self
            .keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.remove(key).await?;
        }
        Ok(doomed.len())
    }
}
