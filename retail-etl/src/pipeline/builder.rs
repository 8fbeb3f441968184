//! Pipeline builder with validation.

use crate::blob::{BlobStore, InMemoryBlobStore, LocalFsBlobStore};
use crate::config::{BlobBackend, CatalogBackend, EtlConfig, WarehouseBackend};
use crate::core::StageName;
use crate::crawler::{CatalogCrawler, InMemoryCrawler, LocalSchemaCrawler};
use crate::errors::{ConfigError, PipelineValidationError};
use crate::stages::{
    BlobExistenceChecker, CatalogRefreshController, DimensionalTransformer, Publisher, Stage,
    StagingLoader,
};
use crate::warehouse::{MemoryWarehouse, Warehouse, WarehouseClient};
use std::sync::Arc;
use tracing::info;

/// The external systems a retail pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Object storage holding the raw and processed zones.
    pub blob: Arc<dyn BlobStore>,
    /// Schema crawler for the raw zone.
    pub crawler: Arc<dyn CatalogCrawler>,
    /// Analytical warehouse.
    pub warehouse: Arc<dyn Warehouse>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Builds the configured backends.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend was selected whose cargo feature is
    /// not compiled in.
    pub fn from_config(config: &EtlConfig) -> Result<Self, ConfigError> {
        let blob: Arc<dyn BlobStore> = match config.storage.backend {
            BlobBackend::Memory => Arc::new(InMemoryBlobStore::new()),
            BlobBackend::Local => Arc::new(LocalFsBlobStore::new(config.storage.local_root.clone())),
            #[cfg(feature = "s3")]
            BlobBackend::S3 => {
                let mut store = crate::blob::ObjectStoreBlobStore::new();
                if let Some(region) = &config.storage.region {
                    store = store.with_region(region);
                }
                if let Some(endpoint) = &config.storage.endpoint {
                    store = store.with_endpoint(endpoint);
                }
                Arc::new(store)
            }
            #[cfg(not(feature = "s3"))]
            BlobBackend::S3 => {
                return Err(ConfigError::invalid(
                    "storage.backend",
                    "s3 support requires the `s3` feature",
                ))
            }
        };

        let crawler: Arc<dyn CatalogCrawler> = match config.catalog.backend {
            CatalogBackend::Memory => Arc::new(InMemoryCrawler::new()),
            CatalogBackend::Local => Arc::new(LocalSchemaCrawler::new(blob.clone())),
        };

        let warehouse: Arc<dyn Warehouse> = match config.warehouse.backend {
            WarehouseBackend::Memory => Arc::new(MemoryWarehouse::new(blob.clone())),
            #[cfg(feature = "postgres")]
            WarehouseBackend::Postgres => {
                let w = &config.warehouse;
                Arc::new(crate::warehouse::PgWarehouse::new(
                    crate::warehouse::PgWarehouseOptions {
                        host: w.host.clone(),
                        port: w.port,
                        database: w.database.clone(),
                        user: w.user.clone(),
                        password: w.password.clone(),
                        require_tls: w.require_tls,
                    },
                ))
            }
            #[cfg(not(feature = "postgres"))]
            WarehouseBackend::Postgres => {
                return Err(ConfigError::invalid(
                    "warehouse.backend",
                    "postgres support requires the `postgres` feature",
                ))
            }
        };

        info!(
            blob = ?config.storage.backend,
            catalog = ?config.catalog.backend,
            warehouse = ?config.warehouse.backend,
            "Collaborators configured"
        );
        Ok(Self {
            blob,
            crawler,
            warehouse,
        })
    }
}

/// A validated linear chain of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages. Never true for a built pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Builder for the full five-stage retail chain.
    #[must_use]
    pub fn retail(config: &EtlConfig, collaborators: &Collaborators) -> Self {
        let client = WarehouseClient::new(collaborators.warehouse.clone());
        let iam_role = config.warehouse.iam_role.as_str();
        Self::new(&config.pipeline_name)
            .stage(Arc::new(BlobExistenceChecker::new(
                collaborators.blob.clone(),
                &config.storage,
            )))
            .stage(Arc::new(CatalogRefreshController::new(
                collaborators.crawler.clone(),
                &config.catalog,
                &config.storage,
            )))
            .stage(Arc::new(StagingLoader::new(
                client.clone(),
                &config.storage,
                iam_role,
            )))
            .stage(Arc::new(DimensionalTransformer::new(client.clone())))
            .stage(Arc::new(Publisher::new(client, &config.storage, iam_role)))
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validates the chain and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is empty, names a stage twice, or
    /// places a stage anywhere but directly after its predecessor.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages"));
        }

        let names: Vec<StageName> = self.stages.iter().map(|s| s.name()).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{name}' appears more than once"
                ))
                .with_stages(vec![name.to_string()]));
            }
            if i > 0 && name.predecessor() != Some(names[i - 1]) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{name}' cannot run after '{}'",
                    names[i - 1]
                ))
                .with_stages(vec![names[i - 1].to_string(), name.to_string()]));
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
        })
    }
}
