//! Mock stages and collaborators for orchestrator tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::cancellation::CancellationToken;
use crate::context::StageContext;
use crate::core::{StageName, StageOutput};
use crate::errors::{CrawlerError, NotifyError, StageError, WarehouseError};
use crate::events::{FailureNotice, FailureNotifier};
use crate::stages::Stage;

/// A stage with scripted behaviour that counts its calls.
///
/// Fails the first `failures` calls with an error of the kind matching
/// its name, then succeeds with the configured output.
#[derive(Debug)]
pub struct ScriptedStage {
    name: StageName,
    output: StageOutput,
    failures: AtomicU32,
    calls: AtomicUsize,
    cancel: Option<CancellationToken>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedStage {
    /// A stage that always succeeds.
    #[must_use]
    pub fn succeeding(name: StageName) -> Self {
        Self::failing(name, 0)
    }

    /// A stage failing its first `times` calls.
    #[must_use]
    pub fn failing(name: StageName, times: u32) -> Self {
        Self {
            name,
            output: StageOutput::empty(),
            failures: AtomicU32::new(times),
            calls: AtomicUsize::new(0),
            cancel: None,
            gate: None,
        }
    }

    /// Sets the output returned on success.
    #[must_use]
    pub fn with_output(mut self, output: StageOutput) -> Self {
        self.output = output;
        self
    }

    /// Cancels `token` while executing.
    #[must_use]
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Blocks each call until `gate` is notified.
    #[must_use]
    pub fn waiting_on(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted_error(&self) -> StageError {
        let cause = || WarehouseError::Connection("scripted failure".to_string());
        match self.name {
            StageName::ValidateInputs => StageError::MissingInput {
                object: "orders".to_string(),
                uri: "memory://scripted/raw/orders.csv".to_string(),
            },
            StageName::CatalogRefresh => StageError::CatalogRequest {
                crawler: "scripted".to_string(),
                source: CrawlerError::Backend("scripted failure".to_string()),
            },
            StageName::Load => StageError::Load {
                context: "connect".to_string(),
                source: cause(),
            },
            StageName::Transform => StageError::Transform {
                context: "connect".to_string(),
                source: cause(),
            },
            StageName::Publish => StageError::Publish {
                context: "connect".to_string(),
                source: cause(),
            },
        }
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(token) = &self.cancel {
            token.cancel("cancelled by scripted stage");
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(self.scripted_error())
        } else {
            Ok(self.output.clone())
        }
    }
}

/// Notifier that keeps every notice.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<FailureNotice>>,
    fail: bool,
}

impl RecordingNotifier {
    /// Creates a notifier that accepts every notice.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a notifier that records notices but reports delivery failure.
    #[must_use]
    pub fn undeliverable() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Notices received so far.
    #[must_use]
    pub fn notices(&self) -> Vec<FailureNotice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        self.notices.lock().push(notice.clone());
        if self.fail {
            return Err(NotifyError::Status(503));
        }
        Ok(())
    }
}
