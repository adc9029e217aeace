//! Object storage for uploaded document bytes.
//!
//! The processor only needs `download`; `upload` is used by the `add`
//! command and the seed driver. Two backends:
//!
//! - [`LocalStorage`]: files under a root directory.
//! - [`S3Storage`](crate::storage_s3::S3Storage): SigV4-signed REST calls.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tutor_rag_core::error::StorageError;

use crate::config::StorageConfig;
use crate::storage_s3::S3Storage;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn upload(&self, path: &str, bytes: &[u8], mime_type: &str) -> Result<(), StorageError>;
}

/// Build the backend named by `[storage] backend`.
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config.backend.as_str() {
        "s3" => Ok(Arc::new(S3Storage::from_config(config)?)),
        _ => Ok(Arc::new(LocalStorage::new(config.root.clone()))),
    }
}

/// Object path for a new upload: `<owner>/<uuid>-<filename>`.
///
/// The filename is reduced to its final component and anything outside
/// `[A-Za-z0-9._-]` becomes `_`.
pub fn object_path(owner_id: &str, filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}/{}-{}", owner_id, uuid::Uuid::new_v4(), safe)
}

/// Filesystem-backed storage rooted at a directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Map an object path to a file under the root. Absolute paths and
    /// `..` components are rejected.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || !clean {
            return Err(StorageError::Request(format!(
                "invalid object path: '{}'",
                path
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, path: &str, bytes: &[u8], _mime_type: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(())
    }
}
