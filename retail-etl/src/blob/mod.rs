//! Blob store interface and implementations.
//!
//! The pipeline only needs existence checks and URIs from the blob store;
//! `get`/`put`/`list` exist for the bundled warehouse and crawler
//! implementations, which read and write objects themselves.

mod local;
mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use local::LocalFsBlobStore;
pub use memory::InMemoryBlobStore;
#[cfg(feature = "s3")]
pub use s3::ObjectStoreBlobStore;

use crate::errors::BlobStoreError;
use async_trait::async_trait;
use std::fmt;

/// Object storage as seen by the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns true if the object exists.
    async fn exists(&self, container: &str, key: &str) -> Result<bool, BlobStoreError>;

    /// Returns the URI of a key or prefix inside a container.
    fn path(&self, container: &str, prefix: &str) -> String;

    /// Reads a whole object.
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Writes a whole object, replacing any existing content.
    async fn put(&self, container: &str, key: &str, data: Vec<u8>) -> Result<(), BlobStoreError>;

    /// Lists object keys starting with `prefix`, sorted.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, BlobStoreError>;
}

/// A parsed `scheme://container/key` object URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUri {
    /// URI scheme (`s3`, `memory`, `local`).
    pub scheme: String,
    /// Container (bucket) name.
    pub container: String,
    /// Key or key prefix; may be empty.
    pub key: String,
}

impl ObjectUri {
    /// Creates a new URI.
    #[must_use]
    pub fn new(
        scheme: impl Into<String>,
        container: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            container: container.into(),
            key: key.into(),
        }
    }

    /// Parses a `scheme://container/key` string.
    pub fn parse(uri: &str) -> Result<Self, BlobStoreError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| BlobStoreError::InvalidUri(uri.to_string()))?;
        let (container, key) = rest.split_once('/').unwrap_or((rest, ""));
        if scheme.is_empty() || container.is_empty() {
            return Err(BlobStoreError::InvalidUri(uri.to_string()));
        }
        Ok(Self::new(scheme, container, key))
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.container, self.key)
    }
}

/// Rejects keys that could escape a container.
pub(crate) fn check_key(key: &str) -> Result<(), BlobStoreError> {
    if key.split('/').any(|segment| segment == "..") || key.starts_with('/') {
        return Err(BlobStoreError::InvalidUri(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        let uri = ObjectUri::parse("s3://retail-data/raw/orders.csv").unwrap();
        assert_eq!(uri.scheme, "s3");
        assert_eq!(uri.container, "retail-data");
        assert_eq!(uri.key, "raw/orders.csv");
        assert_eq!(uri.to_string(), "s3://retail-data/raw/orders.csv");
    }

    #[test]
    fn test_parse_uri_without_key() {
        let uri = ObjectUri::parse("memory://bucket").unwrap();
        assert_eq!(uri.container, "bucket");
        assert_eq!(uri.key, "");
    }

    #[test]
    fn test_parse_invalid_uri() {
        assert!(ObjectUri::parse("raw/orders.csv").is_err());
        assert!(ObjectUri::parse("s3:///orders.csv").is_err());
    }

    #[test]
    fn test_check_key() {
        assert!(check_key("raw/orders.csv").is_ok());
        assert!(check_key("../etc/passwd").is_err());
        assert!(check_key("/abs").is_err());
    }
}
