//! Error types for the retail ETL pipeline.
//!
//! Collaborator errors (`BlobStoreError`, `CrawlerError`, `WarehouseError`)
//! are raised by the external-facing adapters. Each stage wraps them into a
//! [`StageError`] that names the stage-level failure kind and keeps the
//! original cause as its source. The orchestrator surfaces [`EtlError`].

use crate::core::StageName;
use crate::pipeline::RunReport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by a blob store.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// The requested object does not exist.
    #[error("object not found: {container}/{key}")]
    NotFound {
        /// Container (bucket) name.
        container: String,
        /// Object key.
        key: String,
    },

    /// The URI could not be mapped onto this store.
    #[error("invalid object uri '{0}'")]
    InvalidUri(String),

    /// Filesystem error from a local store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by a remote backend.
    #[error("blob backend error: {0}")]
    Backend(String),
}

impl BlobStoreError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            container: container.into(),
            key: key.into(),
        }
    }
}

/// Errors raised by a catalog crawler service.
#[derive(Debug, Clone, Error)]
pub enum CrawlerError {
    /// No crawler with this name exists.
    #[error("crawler not found: {0}")]
    NotFound(String),

    /// A crawler with this name already exists.
    #[error("crawler already exists: {0}")]
    AlreadyExists(String),

    /// The crawler is already running and cannot be started again.
    #[error("crawler already running: {0}")]
    AlreadyRunning(String),

    /// Error reported by the crawler backend.
    #[error("crawler backend error: {0}")]
    Backend(String),
}

/// Errors raised by a warehouse connection.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Could not open a connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A statement was rejected by the warehouse.
    #[error("statement '{statement}' failed: {message}")]
    Statement {
        /// Short label of the statement (e.g. `COPY stg_orders`).
        statement: String,
        /// Warehouse error message.
        message: String,
    },

    /// The statement referenced a relation that does not exist.
    #[error("relation does not exist: {0}")]
    UnknownRelation(String),

    /// Transaction misuse or commit failure.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The connection was already closed.
    #[error("connection is closed")]
    Closed,

    /// Reading or writing object storage during bulk load/unload failed.
    #[error("object storage error during bulk operation: {0}")]
    Blob(#[from] BlobStoreError),

    /// Driver-level error.
    #[cfg(feature = "postgres")]
    #[error("driver error: {0}")]
    Driver(#[from] sqlx::Error),
}

impl WarehouseError {
    /// Creates a statement error.
    #[must_use]
    pub fn statement(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            statement: statement.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while delivering a failure notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request could not be sent.
    #[error("notification request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("notification endpoint returned status {0}")]
    Status(u16),
}

/// Stage-level failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required raw object is absent.
    MissingInput,
    /// The catalog crawler finished in a failed state or could not be driven.
    CatalogJobFailed,
    /// The catalog crawler did not finish within the polling bound.
    CatalogTimeout,
    /// A bulk-load into staging failed.
    Load,
    /// A transform statement failed.
    Transform,
    /// A bulk-unload failed.
    Publish,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingInput => "MissingInputError",
            Self::CatalogJobFailed => "CatalogJobFailedError",
            Self::CatalogTimeout => "CatalogTimeoutError",
            Self::Load => "LoadError",
            Self::Transform => "TransformError",
            Self::Publish => "PublishError",
        };
        f.write_str(s)
    }
}

/// Error returned by a single pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// A required raw object is absent from the blob store.
    #[error("required input '{object}' not found at {uri}")]
    MissingInput {
        /// Logical object name.
        object: String,
        /// Location that was checked.
        uri: String,
    },

    /// The existence check itself failed.
    #[error("could not check input '{object}'")]
    InputCheck {
        /// Logical object name.
        object: String,
        /// Underlying cause.
        #[source]
        source: BlobStoreError,
    },

    /// The crawler reached the FAILED state.
    #[error("catalog crawler '{crawler}' failed")]
    CatalogJobFailed {
        /// Crawler name.
        crawler: String,
    },

    /// A crawler API call failed.
    #[error("catalog crawler '{crawler}' request failed")]
    CatalogRequest {
        /// Crawler name.
        crawler: String,
        /// Underlying cause.
        #[source]
        source: CrawlerError,
    },

    /// The crawler did not leave RUNNING within the polling bound.
    #[error("catalog crawler '{crawler}' still running after {polls} polls")]
    CatalogTimeout {
        /// Crawler name.
        crawler: String,
        /// Number of polls performed.
        polls: u32,
    },

    /// Staging load failed; the load transaction was rolled back.
    #[error("error loading staging tables ({context})")]
    Load {
        /// What was being done (`connect`, `COPY stg_orders`, `commit`, ...).
        context: String,
        /// Underlying cause.
        #[source]
        source: WarehouseError,
    },

    /// Transform failed; the transform transaction was rolled back.
    #[error("error transforming data ({context})")]
    Transform {
        /// What was being done.
        context: String,
        /// Underlying cause.
        #[source]
        source: WarehouseError,
    },

    /// Unload to the processed zone failed.
    #[error("error unloading data ({context})")]
    Publish {
        /// What was being done.
        context: String,
        /// Underlying cause.
        #[source]
        source: WarehouseError,
    },
}

impl StageError {
    /// Returns the failure kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingInput { .. } | Self::InputCheck { .. } => ErrorKind::MissingInput,
            Self::CatalogJobFailed { .. } | Self::CatalogRequest { .. } => {
                ErrorKind::CatalogJobFailed
            }
            Self::CatalogTimeout { .. } => ErrorKind::CatalogTimeout,
            Self::Load { .. } => ErrorKind::Load,
            Self::Transform { .. } => ErrorKind::Transform,
            Self::Publish { .. } => ErrorKind::Publish,
        }
    }

    /// Renders the error and its full source chain on one line.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.chain()));
        map
    }
}

/// Error raised when a pipeline definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Extraction from the configured sources failed.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is present but not acceptable.
    #[error("invalid configuration value for '{field}': {message}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The main error type for pipeline runs.
#[derive(Debug, Error)]
pub enum EtlError {
    /// A stage failed on the final attempt.
    #[error("stage '{stage}' failed after {attempts} attempt(s)")]
    StageFailed {
        /// The failing stage.
        stage: StageName,
        /// Number of attempts made.
        attempts: u32,
        /// The stage error from the final attempt.
        #[source]
        source: StageError,
        /// Report covering every attempt.
        report: Box<RunReport>,
    },

    /// The run was cancelled between stages.
    #[error("run cancelled before stage '{stage}': {reason}")]
    Cancelled {
        /// The stage that was not started.
        stage: StageName,
        /// Cancellation reason.
        reason: String,
    },

    /// Another run is already active on this orchestrator.
    #[error("a pipeline run is already in progress")]
    RunInProgress,

    /// Invalid pipeline definition.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl EtlError {
    /// Returns the failing stage, if the error is stage-scoped.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageName> {
        match self {
            Self::StageFailed { stage, .. } | Self::Cancelled { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns the run report for stage failures.
    #[must_use]
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::StageFailed { report, .. } => Some(&**report),
            _ => None,
        }
    }
}
