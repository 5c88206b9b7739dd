//! Key/value blob store.
//!
//! Blobs are opaque JSON text. A missing key loads as `None`, never as an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::metrics::{record_operation_failure, StoreTimer};

/// Blob store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored blob is not valid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted-state collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Loads the blob stored under `key`.
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `blob` under `key`, replacing any previous value.
    async fn save(&self, key: &str, blob: &str) -> Result<(), StoreError>;
}

/// In-memory store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), blob.to_string());
        Ok(())
    }
}

/// File-backed store keeping one `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Creates a store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        let timer = StoreTimer::new("file_load");
        let result = tokio::fs::read_to_string(&path).await;
        timer.record();

        match result {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                record_operation_failure("file_load");
                Err(e.into())
            }
        }
    }

    async fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let timer = StoreTimer::new("file_save");

        let result = async {
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::write(&tmp, blob).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        timer.record();

        if let Err(e) = result {
            record_operation_failure("file_save");
            return Err(e.into());
        }
        tracing::debug!(key = %key, path = %path.display(), bytes = blob.len(), "Blob saved");
        Ok(())
    }
}
