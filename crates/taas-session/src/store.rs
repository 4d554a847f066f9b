//! Masked credential persistence.
//!
//! One record per device profile under a fixed key. Writes overwrite the
//! previous record; there is no versioning. Concurrent `save`/`clear` from
//! different code paths are last-write-wins.

use std::sync::Arc;

use tracing::debug;

use crate::credential::SessionCredential;
use crate::error::StorageError;
use crate::mask::{MaskEnvironment, MaskKey};
use crate::storage::{StorageBackend, validate_key};

/// Default record key.
pub const SESSION_KEY: &str = "telegram-session";

#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    key: String,
    mask: MaskKey,
}

impl CredentialStore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        key: impl Into<String>,
        environment: &MaskEnvironment,
    ) -> Result<Self, StorageError> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self {
            backend,
            key,
            mask: MaskKey::derive(environment),
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Mask and write the credential, replacing any previous record.
    pub async fn save(&self, credential: &SessionCredential) -> Result<(), StorageError> {
        let record = self.mask.seal(credential);
        let mut scope = self.backend.open().await?;
        scope.put(&self.key, &record).await?;
        debug!(key = %self.key, "credential record written");
        Ok(())
    }

    /// The stored credential, or `None` when there is no record.
    pub async fn load(&self) -> Result<Option<SessionCredential>, StorageError> {
        let mut scope = self.backend.open().await?;
        let Some(record) = scope.get(&self.key).await? else {
            return Ok(None);
        };
        drop(scope);
        self.mask.open(&record).map(Some)
    }

    /// Delete the record. Clearing an empty store is not an error.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut scope = self.backend.open().await?;
        scope.delete(&self.key).await?;
        debug!(key = %self.key, "credential record cleared");
        Ok(())
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
