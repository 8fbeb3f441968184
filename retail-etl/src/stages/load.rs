//! Staging load: raw CSV extracts into the three staging relations.

use super::Stage;
use crate::config::StorageConfig;
use crate::context::StageContext;
use crate::core::{RawObject, StageName, StageOutput};
use crate::errors::StageError;
use crate::warehouse::{BulkLoad, Statement, WarehouseClient};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Replaces staging contents with the current raw extracts.
///
/// Every staging relation is cleared and reloaded inside one transaction,
/// so a failed load leaves staging exactly as it was.
#[derive(Debug)]
pub struct StagingLoader {
    client: WarehouseClient,
    sources: Vec<(RawObject, String)>,
    iam_role: String,
}

impl StagingLoader {
    /// Creates a loader reading the raw zone described by `storage`.
    #[must_use]
    pub fn new(client: WarehouseClient, storage: &StorageConfig, iam_role: impl Into<String>) -> Self {
        Self {
            client,
            sources: RawObject::ALL
                .iter()
                .map(|object| (*object, storage.raw_uri(*object)))
                .collect(),
            iam_role: iam_role.into(),
        }
    }
}

#[async_trait]
impl Stage for StagingLoader {
    fn name(&self) -> StageName {
        StageName::Load
    }

    fn statements(&self) -> Vec<Statement> {
        self.sources
            .iter()
            .flat_map(|(object, uri)| {
                let target = object.staging_relation();
                [
                    Statement::Clear(target),
                    Statement::BulkLoad(BulkLoad::csv(target, uri.clone(), self.iam_role.clone())),
                ]
            })
            .collect()
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        let statements = self.statements();
        let counts = self
            .client
            .run_transaction(&statements)
            .await
            .map_err(|failure| StageError::Load {
                context: failure.context,
                source: failure.source,
            })?;

        let mut output = StageOutput::empty();
        for (statement, rows) in statements.iter().zip(&counts) {
            if let Statement::BulkLoad(load) = statement {
                info!(relation = %load.target, rows, "Staging relation loaded");
                output = output.with(load.target.name(), json!(rows));
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::core::Relation;
    use crate::errors::ErrorKind;
    use crate::testing::{fixtures, stage_context};
    use crate::warehouse::{FaultPoint, MemoryWarehouse};
    use std::sync::Arc;

    fn storage() -> StorageConfig {
        StorageConfig {
            backend: crate::config::BlobBackend::Memory,
            ..StorageConfig::default()
        }
    }

    fn setup() -> (MemoryWarehouse, StagingLoader) {
        let blob = Arc::new(fixtures::raw_zone(&storage()));
        let warehouse = MemoryWarehouse::new(blob);
        let loader = StagingLoader::new(
            WarehouseClient::new(Arc::new(warehouse.clone())),
            &storage(),
            "arn:aws:iam::1:role/r",
        );
        (warehouse, loader)
    }

    #[test]
    fn test_statement_order() {
        let (_, loader) = setup();
        let labels: Vec<String> = loader.statements().iter().map(Statement::label).collect();
        assert_eq!(
            labels,
            vec![
                "DELETE stg_customers",
                "COPY stg_customers",
                "DELETE stg_products",
                "COPY stg_products",
                "DELETE stg_orders",
                "COPY stg_orders",
            ]
        );
    }

    #[tokio::test]
    async fn test_loads_every_staging_relation() {
        let (warehouse, loader) = setup();
        let output = loader.execute(&stage_context(StageName::Load)).await.unwrap();

        assert_eq!(output.count("stg_customers"), Some(3));
        assert_eq!(output.count("stg_products"), Some(2));
        assert_eq!(output.count("stg_orders"), Some(6));
        assert_eq!(warehouse.row_count(Relation::StgOrders), 6);
        assert_eq!(warehouse.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_reload_replaces_previous_contents() {
        let (warehouse, loader) = setup();
        let ctx = stage_context(StageName::Load);
        loader.execute(&ctx).await.unwrap();
        loader.execute(&ctx).await.unwrap();
        assert_eq!(warehouse.row_count(Relation::StgCustomers), 3);
    }

    #[tokio::test]
    async fn test_failed_copy_rolls_back_everything() {
        let (warehouse, loader) = setup();
        let ctx = stage_context(StageName::Load);
        loader.execute(&ctx).await.unwrap();

        warehouse.fail_on(FaultPoint::statement("COPY stg_orders"), "invalid digit");
        let err = loader.execute(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(err.to_string().contains("COPY stg_orders"));
        assert!(err.chain().contains("invalid digit"));
        // The earlier DELETEs in the failed transaction did not stick.
        assert_eq!(warehouse.row_count(Relation::StgCustomers), 3);
        assert_eq!(warehouse.row_count(Relation::StgOrders), 6);
        assert_eq!(warehouse.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (warehouse, loader) = setup();
        warehouse.fail_on(FaultPoint::Connect, "timeout");
        let err = loader.execute(&stage_context(StageName::Load)).await.unwrap_err();
        assert!(matches!(err, StageError::Load { ref context, .. } if context == "connect"));
    }

    #[tokio::test]
    async fn test_missing_object_fails_load() {
        let blob = Arc::new(InMemoryBlobStore::new());
        let warehouse = MemoryWarehouse::new(blob);
        let loader = StagingLoader::new(
            WarehouseClient::new(Arc::new(warehouse.clone())),
            &storage(),
            "role",
        );
        let err = loader.execute(&stage_context(StageName::Load)).await.unwrap_err();
        assert!(matches!(err, StageError::Load { ref context, .. } if context == "COPY stg_customers"));
        assert_eq!(warehouse.open_connections(), 0);
    }
}
