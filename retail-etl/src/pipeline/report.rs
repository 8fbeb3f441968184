//! Run reports.

use crate::core::{StageName, StageOutput, StageStatus};
use crate::errors::{ErrorKind, StageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one stage within one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// The stage.
    pub stage: StageName,
    /// Final status.
    pub status: StageStatus,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage finished.
    pub ended_at: DateTime<Utc>,
    /// Summary counters of a completed stage.
    #[serde(default, skip_serializing_if = "StageOutput::is_empty")]
    pub output: StageOutput,
    /// Failure kind of a failed stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Error message with cause chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    /// Report for a completed stage.
    #[must_use]
    pub fn completed(
        stage: StageName,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        output: StageOutput,
    ) -> Self {
        Self {
            stage,
            status: StageStatus::Completed,
            started_at,
            ended_at,
            output,
            error_kind: None,
            error: None,
        }
    }

    /// Report for a failed stage.
    #[must_use]
    pub fn failed(
        stage: StageName,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        error: &StageError,
    ) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            started_at,
            ended_at,
            output: StageOutput::empty(),
            error_kind: Some(error.kind()),
            error: Some(error.chain()),
        }
    }

    /// Wall time spent in the stage.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Stages run during one attempt, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Stages that ran.
    pub stages: Vec<StageReport>,
}

impl AttemptReport {
    /// Creates an empty attempt report.
    #[must_use]
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            stages: Vec::new(),
        }
    }

    /// Returns the failed stage, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

/// Everything that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub ended_at: Option<DateTime<Utc>>,
    /// Every attempt, in order.
    pub attempts: Vec<AttemptReport>,
}

impl RunReport {
    /// Creates a report for a run that just started.
    #[must_use]
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at,
            ended_at: None,
            attempts: Vec::new(),
        }
    }

    /// Marks the run finished.
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(at);
    }

    /// The last attempt.
    #[must_use]
    pub fn final_attempt(&self) -> Option<&AttemptReport> {
        self.attempts.last()
    }

    /// The report of `stage` in the last attempt.
    #[must_use]
    pub fn stage(&self, stage: StageName) -> Option<&StageReport> {
        self.final_attempt()?
            .stages
            .iter()
            .find(|s| s.stage == stage)
    }

    /// Returns true if the last attempt ran every stage to completion.
    #[must_use]
    pub fn succeeded(&self, stage_count: usize) -> bool {
        self.final_attempt().is_some_and(|a| {
            a.stages.len() == stage_count
                && a.stages.iter().all(|s| s.status == StageStatus::Completed)
        })
    }

    /// Renders the report as pretty-printed JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WarehouseError;
    use serde_json::json;

    #[test]
    fn test_report_lookups() {
        let now = Utc::now();
        let mut report = RunReport::new(Uuid::new_v4(), "retail_etl", now);

        let mut first = AttemptReport::new(1);
        first.stages.push(StageReport::failed(
            StageName::Load,
            now,
            now,
            &StageError::Load {
                context: "connect".to_string(),
                source: WarehouseError::Connection("refused".to_string()),
            },
        ));
        report.attempts.push(first);

        let mut second = AttemptReport::new(2);
        second.stages.push(StageReport::completed(
            StageName::Load,
            now,
            now,
            StageOutput::value("stg_orders", json!(5)),
        ));
        report.attempts.push(second);
        report.finish(now);

        assert_eq!(report.attempts[0].failed_stage().unwrap().error_kind, Some(ErrorKind::Load));
        assert_eq!(report.stage(StageName::Load).unwrap().output.count("stg_orders"), Some(5));
        assert!(report.succeeded(1));
        assert!(!report.succeeded(5));
    }

    #[test]
    fn test_json_omits_empty_fields() {
        let now = Utc::now();
        let mut report = RunReport::new(Uuid::nil(), "p", now);
        let mut attempt = AttemptReport::new(1);
        attempt.stages.push(StageReport::completed(
            StageName::ValidateInputs,
            now,
            now,
            StageOutput::empty(),
        ));
        report.attempts.push(attempt);

        let value: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        let stage = &value["attempts"][0]["stages"][0];
        assert_eq!(stage["stage"], "validate-inputs");
        assert!(stage.get("error").is_none());
        assert!(stage.get("output").is_none());
    }
}
