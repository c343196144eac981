// src/store/blob.rs

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use url::Url;

use super::{StoreError, split_path};

/// Binary object storage for recorded answers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` at `path` and returns a URL the audio can be fetched from.
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError>;
}

/// Stores blobs on the local filesystem below `root`.
///
/// The server exposes `root` under `/media`, so URLs are built from
/// `public_base_url` joined with `media/{path}`.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: Url,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Url) -> Self {
        Self {
            root: root.into(),
            public_base_url,
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        // Blob names carry a file extension, so only the directories follow the
        // document path rules.
        let (dirs, file_name) = path
            .rsplit_once('/')
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        split_path(dirs)?;
        if file_name.is_empty() || file_name.starts_with('.') || file_name.contains("..") {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let url = self
            .public_base_url
            .join(&format!("media/{}", path))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(url.to_string())
    }
}

/// Keeps uploaded blobs in memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        self.blobs.write().await.insert(path.to_string(), bytes);
        Ok(format!("memory://{}", path))
    }
}
