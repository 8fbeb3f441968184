//! Input validation: the raw extracts must be present.

use super::Stage;
use crate::blob::BlobStore;
use crate::config::StorageConfig;
use crate::context::StageContext;
use crate::core::{RawObject, StageName, StageOutput};
use crate::errors::StageError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Checks that every required raw object exists, in declared order.
pub struct BlobExistenceChecker {
    blob: Arc<dyn BlobStore>,
    container: String,
    raw_prefix: String,
    objects: Vec<RawObject>,
}

impl std::fmt::Debug for BlobExistenceChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobExistenceChecker")
            .field("container", &self.container)
            .field("raw_prefix", &self.raw_prefix)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

impl BlobExistenceChecker {
    /// Checks the three retail extracts.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>, storage: &StorageConfig) -> Self {
        Self {
            blob,
            container: storage.container.clone(),
            raw_prefix: storage.raw_prefix.clone(),
            objects: RawObject::ALL.to_vec(),
        }
    }

    /// Replaces the list of required objects.
    #[must_use]
    pub fn with_objects(mut self, objects: Vec<RawObject>) -> Self {
        self.objects = objects;
        self
    }
}

#[async_trait]
impl Stage for BlobExistenceChecker {
    fn name(&self) -> StageName {
        StageName::ValidateInputs
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        let mut found = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let key = object.key(&self.raw_prefix);
            let exists = self
                .blob
                .exists(&self.container, &key)
                .await
                .map_err(|source| StageError::InputCheck {
                    object: object.name().to_string(),
                    source,
                })?;
            if !exists {
                return Err(StageError::MissingInput {
                    object: object.name().to_string(),
                    uri: self.blob.path(&self.container, &key),
                });
            }
            debug!(object = object.name(), key = %key, "Input present");
            found.push(object.name());
        }
        info!(container = %self.container, count = found.len(), "All inputs present");
        Ok(StageOutput::value("inputs", json!(found)))
    }
}
