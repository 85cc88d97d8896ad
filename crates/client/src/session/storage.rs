//! Persisted session state.
//!
//! Two entries are kept: the credential token under [`TOKEN_KEY`] and the
//! serialized identity snapshot under [`USER_KEY`]. They are always written
//! and cleared together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Storage key for the credential token.
pub const TOKEN_KEY: &str = "token";

/// Storage key for the serialized identity snapshot.
pub const USER_KEY: &str = "user";

/// Errors from the session storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file exists but is not a valid entry map.
    #[error("corrupt session file: {0}")]
    Corrupt(String),
}

/// Key/value store for the persisted session entries.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Read one entry.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write several entries in one operation.
    async fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError>;

    /// Remove several entries in one operation.
    async fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError>;
}

/// In-memory storage for tests and anonymous use.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with entries.
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let mut map = self.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// JSON file storage.
///
/// The whole map is rewritten on every change through a temporary file and
/// a rename, so a crash never leaves a half-written file behind.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Storage backed by the file at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if map.is_empty() {
            return match tokio::fs::remove_file(&self.path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(map).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;

        // The token is a bearer credential; keep it private to the user.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = map.len(), "session file written");
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_map().await?.remove(key))
    }

    async fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        // A corrupt file is overwritten rather than merged.
        let mut map = self.read_map().await.unwrap_or_default();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.write_map(&map).await
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.read_map().await.unwrap_or_default();
        for key in keys {
            map.remove(*key);
        }
        self.write_map(&map).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("pricepulse-storage-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[tokio::test]
    async fn test_memory_storage_set_and_remove() {
        let storage = MemoryStorage::new();
        storage
            .set_many(&[(TOKEN_KEY, "t".to_string()), (USER_KEY, "{}".to_string())])
            .await
            .unwrap();
        assert_eq!(storage.get(TOKEN_KEY).await.unwrap().as_deref(), Some("t"));

        storage.remove_many(&[TOKEN_KEY, USER_KEY]).await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_round_trip_and_clear() {
        let path = temp_path("session.json");
        let storage = FileStorage::new(&path);

        assert!(storage.get(TOKEN_KEY).await.unwrap().is_none());

        storage
            .set_many(&[(TOKEN_KEY, "abc".to_string()), (USER_KEY, "{}".to_string())])
            .await
            .unwrap();
        assert_eq!(storage.get(TOKEN_KEY).await.unwrap().as_deref(), Some("abc"));
        assert!(path.exists());

        storage.remove_many(&[TOKEN_KEY, USER_KEY]).await.unwrap();
        assert!(!path.exists());
        // Clearing twice is fine.
        storage.remove_many(&[TOKEN_KEY, USER_KEY]).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_reports_corruption() {
        let path = temp_path("session.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"not json").await.unwrap();

        let storage = FileStorage::new(&path);
        assert!(matches!(storage.get(TOKEN_KEY).await, Err(StorageError::Corrupt(_))));

        storage.remove_many(&[TOKEN_KEY, USER_KEY]).await.unwrap();
        assert!(storage.get(TOKEN_KEY).await.unwrap().is_none());
    }
}
