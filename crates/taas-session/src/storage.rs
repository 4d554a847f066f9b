//! Persistent key-value substrate behind the credential store.
//!
//! A backend is opened lazily per operation and yields a [`StorageScope`].
//! Dropping the scope releases whatever the backend acquired, so every exit
//! path of a caller (including `?` returns) releases it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;

const RECORD_EXTENSION: &str = "rec";

/// Opens scoped access to a persistent store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn open(&self) -> Result<Box<dyn StorageScope>, StorageError>;
}

/// An open handle on the store. Released on drop.
#[async_trait]
pub trait StorageScope: Send {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StorageError>;
    async fn put(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Deleting a missing key is not an error.
    async fn delete(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Reject keys that could escape a record namespace.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// In-process store. Backs in-memory-only sessions and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<String, String>>>,
    open_scopes: Arc<AtomicUsize>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes currently open.
    #[must_use]
    pub fn open_scopes(&self) -> usize {
        self.open_scopes.load(Ordering::SeqCst)
    }

    /// Raw record as written by the credential store.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn open(&self) -> Result<Box<dyn StorageScope>, StorageError> {
        self.open_scopes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryScope {
            records: Arc::clone(&self.records),
            open_scopes: Arc::clone(&self.open_scopes),
        }))
    }
}

struct MemoryScope {
    records: Arc<Mutex<HashMap<String, String>>>,
    open_scopes: Arc<AtomicUsize>,
}

impl MemoryScope {
    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        self.open_scopes.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageScope for MemoryScope {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        Ok(self.records().get(key).cloned())
    }

    async fn put(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.records().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.records().remove(key);
        Ok(())
    }
}

/// One file per record under a directory.
///
/// `put` writes a temporary sibling and renames it over the record, so a
/// record is either fully replaced or left as it was.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_local_dir>/taas/telegram`, falling back to the working
    /// directory when the platform has no data dir.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taas")
            .join("telegram")
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn open(&self) -> Result<Box<dyn StorageScope>, StorageError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|error| {
            StorageError::Unavailable(format!("{}: {error}", self.dir.display()))
        })?;
        Ok(Box::new(FileScope {
            dir: self.dir.clone(),
        }))
    }
}

struct FileScope {
    dir: PathBuf,
}

impl FileScope {
    fn record_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{RECORD_EXTENSION}")))
    }
}

#[async_trait]
impl StorageScope for FileScope {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.record_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) if error.kind() == std::io::ErrorKind::InvalidData => Err(
                StorageError::Corrupt(format!("{}: {error}", path.display())),
            ),
            Err(error) => Err(error.into()),
        }
    }

    async fn put(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.record_path(key)?;
        let staging = self.dir.join(format!(".{key}.{RECORD_EXTENSION}.tmp"));
        if let Err(error) = tokio::fs::write(&staging, value).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error.into());
        }
        if let Err(error) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        let path = self.record_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
