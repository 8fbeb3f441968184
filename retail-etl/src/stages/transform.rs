//! Dimensional transform: staging relations into the star schema.

use super::Stage;
use crate::context::StageContext;
use crate::core::{Relation, StageName, StageOutput};
use crate::errors::StageError;
use crate::warehouse::{Statement, TransformStep, WarehouseClient};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Rebuilds the dimensions and the fact relation in one transaction.
#[derive(Debug)]
pub struct DimensionalTransformer {
    client: WarehouseClient,
}

impl DimensionalTransformer {
    /// Creates a transformer.
    #[must_use]
    pub fn new(client: WarehouseClient) -> Self {
        Self { client }
    }
}

// Fact first so no fact row outlives the dimension rows it references.
const CLEAR_ORDER: [Relation; 4] = [
    Relation::FactOrders,
    Relation::DimCustomers,
    Relation::DimProducts,
    Relation::DimDate,
];

#[async_trait]
impl Stage for DimensionalTransformer {
    fn name(&self) -> StageName {
        StageName::Transform
    }

    fn statements(&self) -> Vec<Statement> {
        CLEAR_ORDER
            .iter()
            .map(|r| Statement::Clear(*r))
            .chain(TransformStep::ORDERED.iter().map(|s| Statement::Transform(*s)))
            .collect()
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        let statements = self.statements();
        let counts = self
            .client
            .run_transaction(&statements)
            .await
            .map_err(|failure| StageError::Transform {
                context: failure.context,
                source: failure.source,
            })?;

        let mut output = StageOutput::empty();
        for (statement, rows) in statements.iter().zip(&counts) {
            if let Statement::Transform(step) = statement {
                info!(relation = %step.target(), rows, "Relation rebuilt");
                output = output.with(step.target().name(), json!(rows));
            }
        }
        Ok(output)
    }
}
