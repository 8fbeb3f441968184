//! The five pipeline stages.
//!
//! Each stage owns its collaborators, translates their errors into a
//! [`StageError`] and releases any warehouse connection before returning.

mod catalog;
mod load;
mod publish;
mod transform;
mod validate;

pub use catalog::{CatalogAction, CatalogRefresh, CatalogRefreshController, RefreshPhase};
pub use load::StagingLoader;
pub use publish::Publisher;
pub use transform::DimensionalTransformer;
pub use validate::BlobExistenceChecker;

use crate::context::StageContext;
use crate::core::{StageName, StageOutput};
use crate::errors::StageError;
use crate::warehouse::Statement;
use async_trait::async_trait;
use std::fmt::Debug;

/// A unit of the pipeline chain.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the stage's position in the chain.
    fn name(&self) -> StageName;

    /// Warehouse statements the stage executes, in order.
    fn statements(&self) -> Vec<Statement> {
        Vec::new()
    }

    /// Runs the stage.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}
