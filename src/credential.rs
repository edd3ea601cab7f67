//! Provider credential management
//!
//! Exactly one credential is active at a time: either the provider's public
//! `demo` identity or a user-supplied API key. The value is persisted in the
//! shared [`Storage`] under [`CREDENTIAL_KEY`], outside the cache namespace.
//!
//! Changing the credential does not clear the cache by itself. Go through
//! [`CacheOrchestrator::rotate_credential`](crate::CacheOrchestrator::rotate_credential)
//! so the wipe always happens with it.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::storage::{Storage, StorageError};

/// Storage key holding the active credential
pub const CREDENTIAL_KEY: &str = "credential";

/// Sentinel persisted for the demo identity
pub const DEMO_KEY: &str = "demo";

/// Errors from reading or changing the credential
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// A blank API key was supplied
    #[error("API key must not be empty")]
    Empty,

    /// Persisting the credential failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The active provider identity
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Credential {
    /// The provider's shared demo key: few symbols, no quota
    #[default]
    Demo,
    /// A user-supplied key with its own quota and entitlements
    ApiKey(String),
}

impl Credential {
    /// Parses a persisted or user-entered value
    ///
    /// Surrounding whitespace is ignored and `demo` maps to [`Credential::Demo`].
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        match raw.trim() {
            "" => Err(CredentialError::Empty),
            DEMO_KEY => Ok(Credential::Demo),
            key => Ok(Credential::ApiKey(key.to_string())),
        }
    }

    /// The value sent as the provider's `apikey` parameter
    pub fn as_str(&self) -> &str {
        match self {
            Credential::Demo => DEMO_KEY,
            Credential::ApiKey(key) => key,
        }
    }

    pub fn is_demo(&self) -> bool {
        matches!(self, Credential::Demo)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persists and retrieves the active [`Credential`]
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// The persisted credential, or [`Credential::Demo`] if none is stored
    ///
    /// An unreadable or malformed record also falls back to demo.
    pub async fn current(&self) -> Credential {
        match self.storage.get(CREDENTIAL_KEY).await {
            Ok(Some(Value::String(raw))) => Credential::parse(&raw).unwrap_or_default(),
            Ok(Some(other)) => {
                warn!(value = %other, "ignoring malformed credential record");
                Credential::Demo
            }
            Ok(None) => Credential::Demo,
            Err(err) => {
                warn!(error = %err, "credential read failed, using demo identity");
                Credential::Demo
            }
        }
    }

    /// Persists `credential` as the active identity
    pub async fn set(&self, credential: &Credential) -> Result<(), CredentialError> {
        let value = Value::String(credential.as_str().to_string());
        self.storage.set(CREDENTIAL_KEY, &value).await?;
        Ok(())
    }

    /// Persists the demo identity
    pub async fn reset_to_default(&self) -> Result<(), CredentialError> {
        self.set(&Credential::Demo).await
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
