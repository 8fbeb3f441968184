//! Testing utilities for the retail pipeline.
//!
//! This module provides:
//! - Sample extracts and pre-loaded warehouses
//! - Scripted stages and a recording notifier
//! - A fully wired in-memory harness

pub mod fixtures;
mod harness;
mod mocks;

pub use harness::RetailHarness;
pub use mocks::{RecordingNotifier, ScriptedStage};

use crate::cancellation::CancellationToken;
use crate::context::{RunContext, StageContext};
use crate::core::StageName;
use crate::events::NoOpEventSink;
use crate::utils::{Clock, ManualClock};
use std::sync::Arc;

/// A first-attempt context for `stage` on a manual clock.
#[must_use]
pub fn stage_context(stage: StageName) -> StageContext {
    stage_context_with_clock(stage, Arc::new(ManualClock::new()))
}

/// A first-attempt context for `stage` on the given clock.
#[must_use]
pub fn stage_context_with_clock(stage: StageName, clock: Arc<dyn Clock>) -> StageContext {
    let run = RunContext::new(
        "test",
        clock,
        Arc::new(NoOpEventSink),
        CancellationToken::new(),
    );
    StageContext::new(Arc::new(run), stage, 1)
}
