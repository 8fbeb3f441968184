//! Run and stage execution contexts.

use crate::cancellation::CancellationToken;
use crate::core::StageName;
use crate::events::{EventKind, EventSink, NoOpEventSink, PipelineEvent};
use crate::utils::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// State shared by every stage of one run.
pub struct RunContext {
    run_id: Uuid,
    pipeline: String,
    started_at: DateTime<Utc>,
    cancellation: CancellationToken,
    event_sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("pipeline", &self.pipeline)
            .field("started_at", &self.started_at)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates a context for a new run with a fresh run id.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            started_at: clock.now(),
            cancellation,
            event_sink,
            clock,
        }
    }

    /// Context with the system clock, no event sink and a fresh token.
    #[must_use]
    pub fn detached(pipeline: impl Into<String>) -> Self {
        Self::new(
            pipeline,
            Arc::new(SystemClock),
            Arc::new(NoOpEventSink),
            CancellationToken::new(),
        )
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Builds an event for this run stamped with the clock's time.
    #[must_use]
    pub fn event(&self, kind: EventKind, attempt: u32) -> PipelineEvent {
        PipelineEvent::new(kind, self.run_id, attempt).at(self.clock.now())
    }
}

/// Context handed to one stage execution.
#[derive(Debug, Clone)]
pub struct StageContext {
    run: Arc<RunContext>,
    stage: StageName,
    attempt: u32,
}

impl StageContext {
    /// Creates a stage context.
    #[must_use]
    pub fn new(run: Arc<RunContext>, stage: StageName, attempt: u32) -> Self {
        Self {
            run,
            stage,
            attempt,
        }
    }

    /// Returns the enclosing run.
    #[must_use]
    pub fn run(&self) -> &RunContext {
        &self.run
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    /// Returns the stage being executed.
    #[must_use]
    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Returns the 1-based run attempt.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.run.clock.as_ref()
    }

    /// Returns whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.run.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    #[test]
    fn test_stage_context_exposes_run() {
        let clock = Arc::new(ManualClock::new());
        let token = CancellationToken::new();
        let run = Arc::new(RunContext::new(
            "retail_etl",
            clock.clone(),
            Arc::new(NoOpEventSink),
            token.clone(),
        ));
        let ctx = StageContext::new(run.clone(), StageName::Load, 2);

        assert_eq!(ctx.run_id(), run.run_id());
        assert_eq!(ctx.stage(), StageName::Load);
        assert_eq!(ctx.attempt(), 2);
        assert_eq!(run.started_at(), clock.now());

        token.cancel("stop");
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_event_uses_clock_time() {
        let clock = Arc::new(ManualClock::new());
        let run = RunContext::new(
            "p",
            clock.clone(),
            Arc::new(NoOpEventSink),
            CancellationToken::new(),
        );
        let event = run.event(EventKind::RunStarted, 1);
        assert_eq!(event.timestamp, clock.now());
        assert_eq!(event.run_id, run.run_id());
    }
}
