//! Publish: unload the star schema to the processed zone.

use super::Stage;
use crate::config::StorageConfig;
use crate::context::StageContext;
use crate::core::{Relation, StageName, StageOutput};
use crate::errors::StageError;
use crate::warehouse::{BulkUnload, Statement, WarehouseClient};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Unloads each published relation to `<processed>/<relation>/data`.
///
/// Unloads run one after another without a surrounding transaction; a
/// failure leaves earlier relations published.
#[derive(Debug)]
pub struct Publisher {
    client: WarehouseClient,
    destinations: Vec<(Relation, String)>,
    iam_role: String,
}

impl Publisher {
    /// Creates a publisher writing under the processed prefix of `storage`.
    #[must_use]
    pub fn new(client: WarehouseClient, storage: &StorageConfig, iam_role: impl Into<String>) -> Self {
        Self {
            client,
            destinations: Relation::PUBLISHED
                .iter()
                .map(|r| (*r, storage.processed_uri(*r)))
                .collect(),
            iam_role: iam_role.into(),
        }
    }
}

#[async_trait]
impl Stage for Publisher {
    fn name(&self) -> StageName {
        StageName::Publish
    }

    fn statements(&self) -> Vec<Statement> {
        self.destinations
            .iter()
            .map(|(relation, uri)| {
                Statement::BulkUnload(BulkUnload::csv(*relation, uri.clone(), self.iam_role.clone()))
            })
            .collect()
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        let counts = self
            .client
            .run_each(&self.statements())
            .await
            .map_err(|failure| StageError::Publish {
                context: failure.context,
                source: failure.source,
            })?;

        let mut output = StageOutput::empty();
        for ((relation, uri), rows) in self.destinations.iter().zip(counts) {
            info!(relation = %relation, rows, destination = %uri, "Relation published");
            output = output.with(relation.name(), json!({ "rows": rows, "uri": uri }));
        }
        Ok(output)
    }
}
