//! S3 blob store built on `object_store`.

use super::{check_key, BlobStore};
use crate::errors::BlobStoreError;
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Blob store over Amazon S3 (or an S3-compatible endpoint).
///
/// Credentials come from the standard AWS environment variables. One client
/// is built lazily per bucket and cached.
#[derive(Debug, Default)]
pub struct ObjectStoreBlobStore {
    region: Option<String>,
    endpoint: Option<String>,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreBlobStore {
    /// Creates a store using the environment's default region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the AWS region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets a custom S3-compatible endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn store(&self, container: &str) -> Result<Arc<dyn ObjectStore>, BlobStoreError> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(container) {
            return Ok(store.clone());
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(container);
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let store: Arc<dyn ObjectStore> = Arc::new(builder.build().map_err(backend)?);
        stores.insert(container.to_string(), store.clone());
        Ok(store)
    }
}

fn backend(err: object_store::Error) -> BlobStoreError {
    BlobStoreError::Backend(err.to_string())
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn exists(&self, container: &str, key: &str) -> Result<bool, BlobStoreError> {
        let store = self.store(container)?;
        match store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    fn path(&self, container: &str, prefix: &str) -> String {
        format!("s3://{container}/{prefix}")
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let store = self.store(container)?;
        let result = match store.get(&Path::from(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(BlobStoreError::not_found(container, key))
            }
            Err(e) => return Err(backend(e)),
        };
        let bytes = result.bytes().await.map_err(backend)?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<(), BlobStoreError> {
        check_key(key)?;
        let store = self.store(container)?;
        store
            .put(&Path::from(key), PutPayload::from(data))
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let store = self.store(container)?;
        let dir = Path::from(prefix);
        let metas: Vec<_> = store
            .list(Some(&dir))
            .try_collect()
            .await
            .map_err(backend)?;

        let mut keys: Vec<String> = metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
