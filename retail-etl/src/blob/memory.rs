//! In-process blob store.

use super::{check_key, BlobStore};
use crate::errors::BlobStoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Blob store holding objects in memory, keyed by `(container, key)`.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// URI scheme used by [`BlobStore::path`].
    pub const SCHEME: &'static str = "memory";

    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object and returns the store.
    #[must_use]
    pub fn with_object(self, container: &str, key: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert(container, key, data);
        self
    }

    /// Inserts or replaces an object.
    pub fn insert(&self, container: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .insert((container.to_string(), key.to_string()), data.into());
    }

    /// Removes an object, returning its content.
    pub fn remove(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .write()
            .remove(&(container.to_string(), key.to_string()))
    }

    /// Returns an object's content as UTF-8 text.
    #[must_use]
    pub fn text(&self, container: &str, key: &str) -> Option<String> {
        self.objects
            .read()
            .get(&(container.to_string(), key.to_string()))
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn exists(&self, container: &str, key: &str) -> Result<bool, BlobStoreError> {
        Ok(self
            .objects
            .read()
            .contains_key(&(container.to_string(), key.to_string())))
    }

    fn path(&self, container: &str, prefix: &str) -> String {
        format!("{}://{container}/{prefix}", Self::SCHEME)
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.objects
            .read()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BlobStoreError::not_found(container, key))
    }

    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<(), BlobStoreError> {
        check_key(key)?;
        self.insert(container, key, data);
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        Ok(self
            .objects
            .read()
            .keys()
            .filter(|(c, k)| c == container && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}
