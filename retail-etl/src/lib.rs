//! # Retail ETL
//!
//! Batch pipeline moving retail CSV extracts from object storage into a
//! warehouse star schema and publishing the result back to storage.
//!
//! A run is a strict chain of five stages:
//!
//! - **validate-inputs**: every raw extract must exist
//! - **catalog-refresh**: drive the schema crawler to a terminal state
//! - **load**: clear and bulk-load the staging relations in one transaction
//! - **transform**: rebuild dimensions and facts in one transaction
//! - **publish**: unload each final relation as a single CSV file
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use retail_etl::prelude::*;
//!
//! let config = EtlConfig::load(Some(Path::new("retail-etl.toml")))?;
//! let collaborators = Collaborators { blob, crawler, warehouse };
//! let report = Orchestrator::from_config(&config, &collaborators)?
//!     .run()
//!     .await?;
//! println!("{}", report.to_json());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod blob;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod crawler;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;
pub mod utils;
pub mod warehouse;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::blob::{BlobStore, InMemoryBlobStore, LocalFsBlobStore};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::EtlConfig;
    pub use crate::context::{RunContext, StageContext};
    pub use crate::core::{RawObject, Relation, StageName, StageOutput, StageStatus};
    pub use crate::crawler::{CatalogCrawler, CrawlerState, InMemoryCrawler, LocalSchemaCrawler};
    pub use crate::errors::{ErrorKind, EtlError, StageError};
    pub use crate::events::{EventSink, FailureNotifier, LogNotifier, LoggingEventSink};
    pub use crate::pipeline::{
        Collaborators, Orchestrator, PipelineBuilder, RetryConfig, RunReport,
    };
    pub use crate::stages::Stage;
    pub use crate::utils::{Clock, SystemClock};
    pub use crate::warehouse::{MemoryWarehouse, Statement, Warehouse, WarehouseClient};
}
