//! Sequential execution with whole-run retry.

use super::builder::{Collaborators, Pipeline, PipelineBuilder};
use super::report::{AttemptReport, RunReport, StageReport};
use super::retry::{should_retry, RetryConfig, RetryDecision, RetryState};
use crate::cancellation::CancellationToken;
use crate::config::EtlConfig;
use crate::context::{RunContext, StageContext};
use crate::core::StageName;
use crate::errors::{EtlError, StageError};
use crate::events::{
    notifier_from_config, EventKind, EventSink, FailureNotice, FailureNotifier, LogNotifier,
    NoOpEventSink, PipelineEvent,
};
use crate::utils::{Clock, SystemClock};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Instrument};

enum AttemptOutcome {
    Completed,
    Failed { stage: StageName, error: StageError },
    Cancelled { stage: StageName, reason: String },
}

/// Runs a [`Pipeline`] stage by stage.
///
/// A stage only starts after its predecessor succeeded. A failed attempt
/// is retried from the first stage according to the [`RetryConfig`]; once
/// attempts are exhausted the failure notifier is told and the error is
/// returned. Only one run may be active per orchestrator.
pub struct Orchestrator {
    pipeline: Pipeline,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    notifier: Arc<dyn FailureNotifier>,
    run_lock: Mutex<()>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.pipeline.name())
            .field("stages", &self.pipeline.stage_names())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with default retry, the system clock, no
    /// event sink and a logging notifier.
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            retry: RetryConfig::default(),
            clock: Arc::new(SystemClock),
            event_sink: Arc::new(NoOpEventSink),
            notifier: Arc::new(LogNotifier),
            run_lock: Mutex::new(()),
        }
    }

    /// Validates `config` and wires the retail chain to `collaborators`,
    /// using the configured retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::Config`] for invalid settings.
    pub fn from_config(config: &EtlConfig, collaborators: &Collaborators) -> Result<Self, EtlError> {
        config.validate()?;
        let pipeline = PipelineBuilder::retail(config, collaborators).build()?;
        let notifier = notifier_from_config(&config.notify)?;
        Ok(Self::new(pipeline)
            .with_retry(config.retry.clone())
            .with_notifier(notifier))
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the clock used for timestamps and retry delays.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Sets the failure notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Returns the pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs the pipeline once, with retries, and no external cancellation.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run_with`].
    pub async fn run(&self) -> Result<RunReport, EtlError> {
        self.run_with(CancellationToken::new()).await
    }

    /// Runs the pipeline, honouring `token` between stages and during the
    /// retry delay.
    ///
    /// # Errors
    ///
    /// - [`EtlError::RunInProgress`] if another run is active.
    /// - [`EtlError::StageFailed`] when the final attempt fails.
    /// - [`EtlError::Cancelled`] when the token fires before a stage.
    pub async fn run_with(&self, token: CancellationToken) -> Result<RunReport, EtlError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!(pipeline = self.pipeline.name(), "Run rejected: another run is active");
            return Err(EtlError::RunInProgress);
        };

        let run = Arc::new(RunContext::new(
            self.pipeline.name(),
            self.clock.clone(),
            self.event_sink.clone(),
            token,
        ));
        let current_attempt = Arc::new(AtomicU32::new(1));
        self.announce_cancellation(&run, current_attempt.clone());

        let span = tracing::info_span!("pipeline_run", pipeline = self.pipeline.name(), run_id = %run.run_id());
        self.run_attempts(run, &current_attempt).instrument(span).await
    }

    /// Emits `run.cancel_requested` as soon as the token fires, even while a
    /// stage is still executing.
    fn announce_cancellation(&self, run: &RunContext, current_attempt: Arc<AtomicU32>) {
        let sink = self.event_sink.clone();
        let clock = self.clock.clone();
        let run_id = run.run_id();
        run.cancellation().on_cancel(move |reason| {
            let attempt = current_attempt.load(Ordering::SeqCst);
            let event = PipelineEvent::new(EventKind::CancelRequested, run_id, attempt)
                .at(clock.now())
                .with_data(json!({ "reason": reason }));
            sink.try_emit(&event);
        });
    }

    async fn run_attempts(
        &self,
        run: Arc<RunContext>,
        current_attempt: &AtomicU32,
    ) -> Result<RunReport, EtlError> {
        let mut report = RunReport::new(run.run_id(), run.pipeline(), run.started_at());
        let mut state = RetryState::new();

        info!(stages = self.pipeline.len(), max_attempts = self.retry.max_attempts, "Run started");
        self.emit(run.event(EventKind::RunStarted, 1).with_data(json!({
            "pipeline": run.pipeline(),
            "stages": self.pipeline.stage_names(),
        })))
        .await;

        loop {
            let attempt = state.attempts + 1;
            current_attempt.store(attempt, Ordering::SeqCst);
            let (attempt_report, outcome) = self.run_attempt(&run, attempt).await;
            report.attempts.push(attempt_report);
            state.record_attempt();

            match outcome {
                AttemptOutcome::Completed => {
                    report.finish(self.clock.now());
                    info!(attempt, "Run completed");
                    self.emit(run.event(EventKind::RunCompleted, attempt)).await;
                    return Ok(report);
                }
                AttemptOutcome::Cancelled { stage, reason } => {
                    return Err(self.cancelled(&run, &mut report, attempt, stage, reason).await);
                }
                AttemptOutcome::Failed { stage, error } => {
                    match should_retry(&state, &self.retry) {
                        RetryDecision::Retry(delay) => {
                            warn!(
                                stage = %stage,
                                attempt,
                                delay_secs = delay.as_secs(),
                                error = %error.chain(),
                                "Attempt failed; retrying whole run"
                            );
                            self.emit(
                                run.event(EventKind::RunRetrying, attempt)
                                    .with_stage(stage)
                                    .with_data(json!({
                                        "kind": error.kind(),
                                        "error": error.chain(),
                                        "delay_secs": delay.as_secs(),
                                    })),
                            )
                            .await;

                            let token = run.cancellation();
                            tokio::select! {
                                biased;
                                () = token.cancelled() => {
                                    let reason = token.reason().unwrap_or_default();
                                    let first = self.first_stage();
                                    return Err(self.cancelled(&run, &mut report, attempt, first, reason).await);
                                }
                                () = self.clock.sleep(delay) => {}
                            }
                        }
                        RetryDecision::GiveUp => {
                            return Err(self.give_up(&run, report, state.attempts, stage, error).await);
                        }
                    }
                }
            }
        }
    }

    async fn run_attempt(&self, run: &Arc<RunContext>, attempt: u32) -> (AttemptReport, AttemptOutcome) {
        let mut attempt_report = AttemptReport::new(attempt);

        for stage in self.pipeline.stages() {
            let name = stage.name();
            if run.cancellation().is_cancelled() {
                let reason = run.cancellation().reason().unwrap_or_default();
                return (attempt_report, AttemptOutcome::Cancelled { stage: name, reason });
            }

            let ctx = StageContext::new(run.clone(), name, attempt);
            info!(stage = %name, attempt, "Stage started");
            self.emit(run.event(EventKind::StageStarted, attempt).with_stage(name)).await;

            let started_at = self.clock.now();
            let result = stage
                .execute(&ctx)
                .instrument(tracing::info_span!("stage", stage = %name, attempt))
                .await;
            let ended_at = self.clock.now();

            match result {
                Ok(output) => {
                    info!(stage = %name, attempt, "Stage completed");
                    self.emit(
                        run.event(EventKind::StageCompleted, attempt)
                            .with_stage(name)
                            .with_data(json!(output.data)),
                    )
                    .await;
                    attempt_report
                        .stages
                        .push(StageReport::completed(name, started_at, ended_at, output));
                }
                Err(error) => {
                    error!(stage = %name, attempt, kind = %error.kind(), error = %error.chain(), "Stage failed");
                    self.emit(
                        run.event(EventKind::StageFailed, attempt)
                            .with_stage(name)
                            .with_data(json!(error.to_dict())),
                    )
                    .await;
                    attempt_report
                        .stages
                        .push(StageReport::failed(name, started_at, ended_at, &error));
                    return (attempt_report, AttemptOutcome::Failed { stage: name, error });
                }
            }
        }

        (attempt_report, AttemptOutcome::Completed)
    }

    async fn give_up(
        &self,
        run: &RunContext,
        mut report: RunReport,
        attempts: u32,
        stage: StageName,
        error: StageError,
    ) -> EtlError {
        let failed_at = self.clock.now();
        report.finish(failed_at);
        error!(stage = %stage, attempts, error = %error.chain(), "Run failed");
        self.emit(
            run.event(EventKind::RunFailed, attempts)
                .with_stage(stage)
                .with_data(json!({ "kind": error.kind(), "error": error.chain() })),
        )
        .await;

        let notice = FailureNotice {
            pipeline: run.pipeline().to_string(),
            run_id: run.run_id(),
            stage,
            kind: Some(error.kind()),
            message: error.chain(),
            attempts,
            failed_at,
        };
        if let Err(e) = self.notifier.notify(&notice).await {
            warn!(error = %e, "Failure notification was not delivered");
        }

        EtlError::StageFailed {
            stage,
            attempts,
            source: error,
            report: Box::new(report),
        }
    }

    async fn cancelled(
        &self,
        run: &RunContext,
        report: &mut RunReport,
        attempt: u32,
        stage: StageName,
        reason: String,
    ) -> EtlError {
        report.finish(self.clock.now());
        warn!(stage = %stage, reason = %reason, "Run cancelled");
        self.emit(
            run.event(EventKind::RunFailed, attempt)
                .with_stage(stage)
                .with_data(json!({ "cancelled": true, "reason": reason })),
        )
        .await;
        EtlError::Cancelled { stage, reason }
    }

    fn first_stage(&self) -> StageName {
        self.pipeline
            .stages()
            .first()
            .map_or(StageName::ValidateInputs, |s| s.name())
    }

    async fn emit(&self, event: PipelineEvent) {
        self.event_sink.emit(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{RecordingNotifier, ScriptedStage};
    use crate::utils::ManualClock;
    use std::time::Duration;

    struct Fixture {
        stages: Vec<Arc<ScriptedStage>>,
        clock: Arc<ManualClock>,
        sink: Arc<CollectingEventSink>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Fixture {
        fn new(stages: Vec<ScriptedStage>) -> Self {
            Self {
                stages: stages.into_iter().map(Arc::new).collect(),
                clock: Arc::new(ManualClock::new()),
                sink: Arc::new(CollectingEventSink::new()),
                notifier: Arc::new(RecordingNotifier::new()),
            }
        }

        fn orchestrator(&self, retry: RetryConfig) -> Orchestrator {
            let mut builder = PipelineBuilder::new("test");
            for stage in &self.stages {
                builder = builder.stage(stage.clone());
            }
            Orchestrator::new(builder.build().unwrap())
                .with_retry(retry)
                .with_clock(self.clock.clone())
                .with_event_sink(self.sink.clone())
                .with_notifier(self.notifier.clone())
        }
    }

    fn chain() -> Vec<ScriptedStage> {
        StageName::ALL
            .iter()
            .map(|n| ScriptedStage::succeeding(*n))
            .collect()
    }

    #[tokio::test]
    async fn test_runs_every_stage_in_order() {
        let fixture = Fixture::new(chain());
        let report = fixture.orchestrator(RetryConfig::default()).run().await.unwrap();

        assert!(report.succeeded(5));
        assert_eq!(report.attempts.len(), 1);
        assert!(fixture.stages.iter().all(|s| s.calls() == 1));
        assert_eq!(
            fixture.sink.kinds().first().copied(),
            Some("run.started")
        );
        assert_eq!(fixture.sink.kinds().last().copied(), Some("run.completed"));
        assert_eq!(fixture.sink.events_of_type("stage.completed").len(), 5);
        assert!(fixture.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_chain_and_notifies() {
        let mut stages = chain();
        stages[2] = ScriptedStage::failing(StageName::Load, 99);
        let fixture = Fixture::new(stages);

        let err = fixture
            .orchestrator(RetryConfig::no_retry())
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.failed_stage(), Some(StageName::Load));
        assert_eq!(fixture.stages[3].calls(), 0);
        assert_eq!(fixture.stages[4].calls(), 0);

        let notices = fixture.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].stage, StageName::Load);
        assert_eq!(notices[0].kind, Some(ErrorKind::Load));
        assert_eq!(notices[0].attempts, 1);

        let report = err.report().unwrap();
        assert_eq!(report.attempts[0].stages.len(), 3);
        assert!(report.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_restarts_from_first_stage() {
        let mut stages = chain();
        stages[3] = ScriptedStage::failing(StageName::Transform, 1);
        let fixture = Fixture::new(stages);

        let report = fixture
            .orchestrator(RetryConfig::default())
            .run()
            .await
            .unwrap();

        assert_eq!(report.attempts.len(), 2);
        assert_eq!(fixture.stages[0].calls(), 2);
        assert_eq!(fixture.stages[3].calls(), 2);
        assert_eq!(fixture.clock.sleeps(), vec![Duration::from_secs(300)]);
        assert_eq!(fixture.sink.events_of_type("run.retrying").len(), 1);
        assert!(fixture.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let mut stages = chain();
        stages[0] = ScriptedStage::failing(StageName::ValidateInputs, 99);
        let fixture = Fixture::new(stages);

        let err = fixture
            .orchestrator(RetryConfig::default().with_max_attempts(3))
            .run()
            .await
            .unwrap_err();

        match err {
            EtlError::StageFailed { attempts, ref report, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(report.attempts.len(), 3);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(fixture.clock.sleeps().len(), 2);
        assert_eq!(fixture.notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_between_stages() {
        let token = CancellationToken::new();
        let mut stages = chain();
        stages[1] = ScriptedStage::succeeding(StageName::CatalogRefresh).cancelling(token.clone());
        let fixture = Fixture::new(stages);

        let err = fixture
            .orchestrator(RetryConfig::default())
            .run_with(token)
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Cancelled { stage: StageName::Load, .. }));
        assert_eq!(fixture.stages[2].calls(), 0);
        assert!(fixture.notifier.notices().is_empty());

        let kinds = fixture.sink.kinds();
        let requested = kinds.iter().position(|k| *k == "run.cancel_requested").unwrap();
        let completed = kinds.iter().rposition(|k| *k == "stage.completed").unwrap();
        assert!(requested < completed, "announced while catalog-refresh was running");
        assert_eq!(kinds.last().copied(), Some("run.failed"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_stage() {
        let token = CancellationToken::new();
        token.cancel("shutdown");
        let fixture = Fixture::new(chain());

        let err = fixture
            .orchestrator(RetryConfig::default())
            .run_with(token)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EtlError::Cancelled { stage: StageName::ValidateInputs, ref reason } if reason == "shutdown"
        ));
        assert_eq!(fixture.stages[0].calls(), 0);

        let requested = fixture.sink.events_of_type("run.cancel_requested");
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].attempt, 1);
        assert_eq!(requested[0].data["reason"], "shutdown");
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay() {
        let token = CancellationToken::new();
        let mut stages = chain();
        stages[0] = ScriptedStage::failing(StageName::ValidateInputs, 99).cancelling(token.clone());
        let fixture = Fixture::new(stages);

        let err = fixture
            .orchestrator(RetryConfig::default())
            .run_with(token)
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Cancelled { stage: StageName::ValidateInputs, .. }));
        assert_eq!(fixture.stages[0].calls(), 1);
        assert!(fixture.clock.sleeps().is_empty());
        assert!(fixture.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fixture = Fixture::new(vec![
            ScriptedStage::succeeding(StageName::ValidateInputs).waiting_on(gate.clone()),
        ]);
        let orchestrator = Arc::new(fixture.orchestrator(RetryConfig::default()));

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run().await }
        });
        while fixture.stages[0].calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(orchestrator.run().await, Err(EtlError::RunInProgress)));
        gate.notify_one();
        assert!(first.await.unwrap().is_ok());

        // The lock is released once the first run returns.
        gate.notify_one();
        assert!(orchestrator.run().await.is_ok());
    }
}
