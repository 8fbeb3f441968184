//! Run lifecycle events and failure notification.
//!
//! The orchestrator emits a [`PipelineEvent`] at each run and stage
//! boundary to the configured [`EventSink`]. When a run fails for good, a
//! [`FailureNotifier`] is told once.

mod notify;
mod sink;

pub use notify::{notifier_from_config, FailureNotice, FailureNotifier, LogNotifier};
#[cfg(feature = "webhook")]
pub use notify::WebhookNotifier;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::StageName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// An attempt of the run began.
    #[serde(rename = "run.started")]
    RunStarted,
    /// A stage began executing.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage succeeded.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// A stage failed.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// Cancellation was requested; the run stops before its next stage.
    #[serde(rename = "run.cancel_requested")]
    CancelRequested,
    /// The run failed and will be attempted again.
    #[serde(rename = "run.retrying")]
    RunRetrying,
    /// Every stage succeeded.
    #[serde(rename = "run.completed")]
    RunCompleted,
    /// The run failed on its final attempt or was cancelled.
    #[serde(rename = "run.failed")]
    RunFailed,
}

impl EventKind {
    /// Returns the dotted event type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run.started",
            Self::StageStarted => "stage.started",
            Self::StageCompleted => "stage.completed",
            Self::StageFailed => "stage.failed",
            Self::CancelRequested => "run.cancel_requested",
            Self::RunRetrying => "run.retrying",
            Self::RunCompleted => "run.completed",
            Self::RunFailed => "run.failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Event type.
    pub kind: EventKind,
    /// Run identifier.
    pub run_id: Uuid,
    /// Stage the event concerns, if any.
    pub stage: Option<StageName>,
    /// 1-based run attempt.
    pub attempt: u32,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload.
    pub data: serde_json::Value,
}

impl PipelineEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(kind: EventKind, run_id: Uuid, attempt: u32) -> Self {
        Self {
            kind,
            run_id,
            stage: None,
            attempt,
            timestamp: Utc::now(),
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
