//! Filesystem-backed blob store.

use super::{check_key, BlobStore};
use crate::errors::BlobStoreError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Blob store mapping each container to a directory under `root`.
///
/// URIs use the `local` scheme and are resolved relative to the root, so
/// `local://retail-data/raw/orders.csv` is `<root>/retail-data/raw/orders.csv`.
#[derive(Debug, Clone)]
pub struct LocalFsBlobStore {
    root: PathBuf,
}

impl LocalFsBlobStore {
    /// URI scheme used by [`BlobStore::path`].
    pub const SCHEME: &'static str = "local";

    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, BlobStoreError> {
        check_key(container)?;
        check_key(key)?;
        Ok(self.root.join(container).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn exists(&self, container: &str, key: &str) -> Result<bool, BlobStoreError> {
        let path = self.object_path(container, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn path(&self, container: &str, prefix: &str) -> String {
        format!("{}://{container}/{prefix}", Self::SCHEME)
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.object_path(container, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::not_found(container, key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<(), BlobStoreError> {
        let path = self.object_path(container, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let base = self.object_path(container, "")?;
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&base) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
