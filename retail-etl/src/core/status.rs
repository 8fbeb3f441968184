//! Stage identity and status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five stages of a retail ETL run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Fast-fail check that every raw object is present.
    ValidateInputs,
    /// Refresh the schema catalog of the raw zone.
    CatalogRefresh,
    /// Bulk-load raw objects into staging relations.
    Load,
    /// Build dimension and fact relations from staging.
    Transform,
    /// Unload final relations to the processed zone.
    Publish,
}

impl StageName {
    /// All stages in chain order.
    pub const ALL: [Self; 5] = [
        Self::ValidateInputs,
        Self::CatalogRefresh,
        Self::Load,
        Self::Transform,
        Self::Publish,
    ];

    /// Returns the stage identifier used in logs and events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidateInputs => "validate-inputs",
            Self::CatalogRefresh => "catalog-refresh",
            Self::Load => "load",
            Self::Transform => "transform",
            Self::Publish => "publish",
        }
    }

    /// Returns the stage that must complete before this one, if any.
    #[must_use]
    pub const fn predecessor(&self) -> Option<Self> {
        match self {
            Self::ValidateInputs => None,
            Self::CatalogRefresh => Some(Self::ValidateInputs),
            Self::Load => Some(Self::CatalogRefresh),
            Self::Transform => Some(Self::Load),
            Self::Publish => Some(Self::Transform),
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The execution status of a stage within one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Completed,
    /// Stage failed.
    Failed,
    /// Stage was not started because an earlier stage failed.
    Skipped,
    /// Stage was not started because the run was cancelled.
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}
