//! Pipeline building and execution.
//!
//! This module provides:
//! - A validated linear chain of stages
//! - The orchestrator with whole-run retry and cancellation
//! - Run reports

mod builder;
mod orchestrator;
mod report;
mod retry;

#[cfg(test)]
mod integration_tests;

pub use builder::{Collaborators, Pipeline, PipelineBuilder};
pub use orchestrator::Orchestrator;
pub use report::{AttemptReport, RunReport, StageReport};
pub use retry::{should_retry, BackoffStrategy, RetryConfig, RetryDecision, RetryState};
