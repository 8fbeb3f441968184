//! Operator notification when a run fails for good.

use crate::config::NotifyConfig;
use crate::core::StageName;
use crate::errors::{ConfigError, ErrorKind, NotifyError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// What an operator is told about a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    /// Pipeline name.
    pub pipeline: String,
    /// Run identifier.
    pub run_id: Uuid,
    /// The failing stage.
    pub stage: StageName,
    /// Failure kind, when a stage error caused the failure.
    pub kind: Option<ErrorKind>,
    /// Error message with its cause chain.
    pub message: String,
    /// Attempts made.
    pub attempts: u32,
    /// When the run gave up.
    pub failed_at: DateTime<Utc>,
}

/// Delivers failure notices.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    /// Sends one notice.
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError>;
}

/// Reports failures as error-level log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl FailureNotifier for LogNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        error!(
            pipeline = %notice.pipeline,
            run_id = %notice.run_id,
            stage = %notice.stage,
            kind = ?notice.kind,
            attempts = notice.attempts,
            "Pipeline run failed: {}", notice.message
        );
        Ok(())
    }
}

/// Posts failure notices as JSON to a webhook.
#[cfg(feature = "webhook")]
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "webhook")]
impl WebhookNotifier {
    /// Creates a notifier posting to `url`.
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[cfg(feature = "webhook")]
#[async_trait]
impl FailureNotifier for WebhookNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Picks the notifier for `config`: a webhook when a URL is set, the log
/// otherwise.
pub fn notifier_from_config(config: &NotifyConfig) -> Result<Arc<dyn FailureNotifier>, ConfigError> {
    match &config.webhook_url {
        None => Ok(Arc::new(LogNotifier)),
        #[cfg(feature = "webhook")]
        Some(url) => {
            let timeout = std::time::Duration::from_secs(config.timeout_secs);
            let notifier = WebhookNotifier::new(url, timeout)
                .map_err(|e| ConfigError::invalid("notify.webhook_url", e.to_string()))?;
            Ok(Arc::new(notifier))
        }
        #[cfg(not(feature = "webhook"))]
        Some(_) => Err(ConfigError::invalid(
            "notify.webhook_url",
            "webhook delivery requires the `webhook` feature",
        )),
    }
}
