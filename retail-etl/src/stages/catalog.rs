//! Catalog refresh: drive the crawler to a terminal state.
//!
//! [`CatalogRefresh`] is a pure step function from the observed crawler
//! state to the next action. [`CatalogRefreshController`] performs the
//! actions against a [`CatalogCrawler`] and sleeps on the run's clock.

use super::Stage;
use crate::config::{CatalogConfig, StorageConfig};
use crate::context::StageContext;
use crate::core::{RawObject, StageName, StageOutput};
use crate::crawler::{CatalogCrawler, CrawlerDefinition, CrawlerState};
use crate::errors::{CrawlerError, StageError};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the refresh is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    /// Nothing observed yet.
    Initial,
    /// The crawler definition was created by this refresh.
    Created,
    /// A crawl is in progress; `polls` waits have been issued.
    Started {
        /// Waits issued while the crawler was running.
        polls: u32,
    },
}

/// Next thing the controller must do.
#[derive(Debug)]
pub enum CatalogAction {
    /// Create the crawler definition.
    Create,
    /// Start a crawl.
    Start,
    /// Sleep, then observe again.
    Wait(Duration),
    /// The crawl finished successfully.
    Done,
    /// The refresh failed.
    Fail(StageError),
}

/// The refresh state machine.
#[derive(Debug, Clone)]
pub struct CatalogRefresh {
    crawler: String,
    interval: Duration,
    max_polls: u32,
    phase: RefreshPhase,
}

impl CatalogRefresh {
    /// Creates a refresh in the initial phase.
    #[must_use]
    pub fn new(crawler: impl Into<String>, interval: Duration, max_polls: u32) -> Self {
        Self {
            crawler: crawler.into(),
            interval,
            max_polls,
            phase: RefreshPhase::Initial,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> RefreshPhase {
        self.phase
    }

    /// Consumes one observation and returns the next action.
    pub fn step(&mut self, observed: CrawlerState) -> CatalogAction {
        match (self.phase, observed) {
            (RefreshPhase::Started { .. }, CrawlerState::Failed) => {
                CatalogAction::Fail(StageError::CatalogJobFailed {
                    crawler: self.crawler.clone(),
                })
            }
            (RefreshPhase::Initial, CrawlerState::NotExists) => {
                self.phase = RefreshPhase::Created;
                CatalogAction::Create
            }
            // FAILED before this refresh started is a previous crawl's result.
            (
                RefreshPhase::Initial | RefreshPhase::Created,
                CrawlerState::Ready | CrawlerState::Failed,
            ) => {
                self.phase = RefreshPhase::Started { polls: 0 };
                CatalogAction::Start
            }
            (RefreshPhase::Initial | RefreshPhase::Created, CrawlerState::Running) => {
                // Someone else's crawl: wait for it, never start another.
                self.phase = RefreshPhase::Started { polls: 0 };
                self.wait(0)
            }
            (RefreshPhase::Started { polls }, CrawlerState::Running) => self.wait(polls),
            (RefreshPhase::Started { .. }, CrawlerState::Ready) => CatalogAction::Done,
            (RefreshPhase::Created | RefreshPhase::Started { .. }, CrawlerState::NotExists) => {
                CatalogAction::Fail(StageError::CatalogRequest {
                    crawler: self.crawler.clone(),
                    source: CrawlerError::NotFound(self.crawler.clone()),
                })
            }
        }
    }

    fn wait(&mut self, polls: u32) -> CatalogAction {
        if polls >= self.max_polls {
            return CatalogAction::Fail(StageError::CatalogTimeout {
                crawler: self.crawler.clone(),
                polls,
            });
        }
        self.phase = RefreshPhase::Started { polls: polls + 1 };
        CatalogAction::Wait(self.interval)
    }
}

/// Stage refreshing the schema catalog for the raw zone.
pub struct CatalogRefreshController {
    crawler: Arc<dyn CatalogCrawler>,
    definition: CrawlerDefinition,
    interval: Duration,
    max_polls: u32,
}

impl std::fmt::Debug for CatalogRefreshController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogRefreshController")
            .field("definition", &self.definition)
            .field("interval", &self.interval)
            .field("max_polls", &self.max_polls)
            .finish_non_exhaustive()
    }
}

impl CatalogRefreshController {
    /// Creates a controller crawling the three raw extracts.
    #[must_use]
    pub fn new(
        crawler: Arc<dyn CatalogCrawler>,
        catalog: &CatalogConfig,
        storage: &StorageConfig,
    ) -> Self {
        let definition = CrawlerDefinition {
            name: catalog.crawler_name.clone(),
            role: catalog.role.clone(),
            database: catalog.database.clone(),
            targets: RawObject::ALL
                .iter()
                .map(|object| storage.raw_uri(*object))
                .collect(),
        };
        Self {
            crawler,
            definition,
            interval: catalog.poll_interval(),
            max_polls: catalog.max_poll_attempts,
        }
    }

    /// Returns the definition used when the crawler must be created.
    #[must_use]
    pub fn definition(&self) -> &CrawlerDefinition {
        &self.definition
    }

    fn request_error(&self, source: CrawlerError) -> StageError {
        StageError::CatalogRequest {
            crawler: self.definition.name.clone(),
            source,
        }
    }
}

#[async_trait]
impl Stage for CatalogRefreshController {
    fn name(&self) -> StageName {
        StageName::CatalogRefresh
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let name = self.definition.name.as_str();
        let mut refresh = CatalogRefresh::new(name, self.interval, self.max_polls);
        let mut created = false;
        let mut started = false;
        let mut polls = 0u32;

        loop {
            let observed = self
                .crawler
                .get_state(name)
                .await
                .map_err(|e| self.request_error(e))?;
            debug!(crawler = name, state = %observed, "Crawler state observed");

            match refresh.step(observed) {
                CatalogAction::Create => {
                    info!(crawler = name, targets = ?self.definition.targets, "Creating crawler");
                    match self.crawler.create(&self.definition).await {
                        Ok(()) => created = true,
                        Err(CrawlerError::AlreadyExists(_)) => {
                            warn!(crawler = name, "Crawler appeared concurrently; reusing it");
                        }
                        Err(e) => return Err(self.request_error(e)),
                    }
                }
                CatalogAction::Start => {
                    info!(crawler = name, "Starting crawler");
                    match self.crawler.start(name).await {
                        Ok(()) => started = true,
                        Err(CrawlerError::AlreadyRunning(_)) => {
                            warn!(crawler = name, "Crawler already running; waiting for it");
                        }
                        Err(e) => return Err(self.request_error(e)),
                    }
                    // State changes lag the start call.
                    ctx.clock().sleep(self.interval).await;
                }
                CatalogAction::Wait(delay) => {
                    polls += 1;
                    debug!(crawler = name, polls, delay_secs = delay.as_secs(), "Crawler running");
                    ctx.clock().sleep(delay).await;
                }
                CatalogAction::Done => {
                    info!(crawler = name, polls, "Crawler finished");
                    return Ok(StageOutput::value("crawler", json!(name))
                        .with("created", json!(created))
                        .with("started", json!(started))
                        .with("polls", json!(polls)));
                }
                CatalogAction::Fail(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::crawler::{CrawlerCall, InMemoryCrawler, LocalSchemaCrawler};
    use crate::errors::ErrorKind;
    use crate::testing::fixtures::{self, seed_raw_zone};
    use crate::testing::{stage_context, stage_context_with_clock};
    use crate::utils::ManualClock;

    const SECS_30: Duration = Duration::from_secs(30);

    #[test]
    fn test_step_from_not_exists() {
        let mut refresh = CatalogRefresh::new("c", SECS_30, 3);
        assert!(matches!(refresh.step(CrawlerState::NotExists), CatalogAction::Create));
        assert_eq!(refresh.phase(), RefreshPhase::Created);
        assert!(matches!(refresh.step(CrawlerState::Ready), CatalogAction::Start));
        assert!(matches!(refresh.step(CrawlerState::Running), CatalogAction::Wait(d) if d == SECS_30));
        assert!(matches!(refresh.step(CrawlerState::Ready), CatalogAction::Done));
    }

    #[test]
    fn test_step_running_never_starts() {
        let mut refresh = CatalogRefresh::new("c", SECS_30, 3);
        for _ in 0..3 {
            assert!(matches!(refresh.step(CrawlerState::Running), CatalogAction::Wait(_)));
        }
        match refresh.step(CrawlerState::Running) {
            CatalogAction::Fail(e) => assert_eq!(e.kind(), ErrorKind::CatalogTimeout),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_step_failed_after_start_is_terminal() {
        let mut refresh = CatalogRefresh::new("c", SECS_30, 3);
        refresh.step(CrawlerState::Ready);
        match refresh.step(CrawlerState::Failed) {
            CatalogAction::Fail(e) => assert_eq!(e.kind(), ErrorKind::CatalogJobFailed),
            other => panic!("expected failure, got {other:?}"),
        }

        let mut refresh = CatalogRefresh::new("c", SECS_30, 3);
        refresh.step(CrawlerState::Running);
        assert!(matches!(
            refresh.step(CrawlerState::Failed),
            CatalogAction::Fail(StageError::CatalogJobFailed { .. })
        ));
    }

    #[test]
    fn test_step_stale_failure_starts_new_crawl() {
        let mut refresh = CatalogRefresh::new("c", SECS_30, 3);
        assert!(matches!(refresh.step(CrawlerState::Failed), CatalogAction::Start));
        assert_eq!(refresh.phase(), RefreshPhase::Started { polls: 0 });
        assert!(matches!(refresh.step(CrawlerState::Ready), CatalogAction::Done));
    }

    fn controller(crawler: Arc<InMemoryCrawler>, max_polls: u32) -> CatalogRefreshController {
        let catalog = CatalogConfig {
            max_poll_attempts: max_polls,
            ..CatalogConfig::default()
        };
        CatalogRefreshController::new(crawler, &catalog, &StorageConfig::default())
    }

    #[tokio::test]
    async fn test_creates_starts_and_polls_to_ready() {
        let crawler = Arc::new(InMemoryCrawler::new().with_polls_per_run(2));
        let clock = Arc::new(ManualClock::new());
        let stage = controller(crawler.clone(), 10);

        let output = stage
            .execute(&stage_context_with_clock(StageName::CatalogRefresh, clock.clone()))
            .await
            .unwrap();

        assert_eq!(crawler.create_count(), 1);
        assert_eq!(crawler.start_count(), 1);
        assert_eq!(output.count("polls"), Some(2));
        // One wait after start plus one per running poll.
        assert_eq!(clock.sleeps(), vec![SECS_30; 3]);

        let definition = crawler.definition("retail_data_crawler").unwrap();
        assert_eq!(definition.targets[0], "local://retail-data/raw/customers.csv");
    }

    #[tokio::test]
    async fn test_running_crawler_is_only_polled() {
        let crawler = Arc::new(
            InMemoryCrawler::new()
                .with_crawler("retail_data_crawler", CrawlerState::Running)
                .with_polls_per_run(3),
        );
        let stage = controller(crawler.clone(), 10);

        stage
            .execute(&stage_context_with_clock(
                StageName::CatalogRefresh,
                Arc::new(ManualClock::new()),
            ))
            .await
            .unwrap();

        assert!(crawler
            .calls()
            .iter()
            .all(|c| matches!(c, CrawlerCall::GetState(_))));
        assert_eq!(crawler.poll_count(), 4);
    }

    #[tokio::test]
    async fn test_failed_crawl_is_not_retried() {
        let crawler = Arc::new(
            InMemoryCrawler::new()
                .with_crawler("retail_data_crawler", CrawlerState::Ready)
                .with_outcome(CrawlerState::Failed),
        );
        let stage = controller(crawler.clone(), 10);

        let err = stage
            .execute(&stage_context_with_clock(
                StageName::CatalogRefresh,
                Arc::new(ManualClock::new()),
            ))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CatalogJobFailed);
        assert!(err.to_string().contains("retail_data_crawler"));
        assert_eq!(crawler.start_count(), 1);
    }

    #[tokio::test]
    async fn test_previously_failed_crawler_is_started_again() {
        let crawler = Arc::new(
            InMemoryCrawler::new().with_crawler("retail_data_crawler", CrawlerState::Failed),
        );
        let stage = controller(crawler.clone(), 10);

        let output = stage
            .execute(&stage_context_with_clock(
                StageName::CatalogRefresh,
                Arc::new(ManualClock::new()),
            ))
            .await
            .unwrap();

        assert_eq!(crawler.start_count(), 1);
        assert_eq!(crawler.create_count(), 0);
        assert_eq!(output.get("started"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_rerun_recrawls_after_input_is_fixed() {
        let blob = Arc::new(InMemoryBlobStore::new());
        let storage = StorageConfig {
            backend: crate::config::BlobBackend::Memory,
            ..StorageConfig::default()
        };
        seed_raw_zone(&blob, &storage);
        blob.insert(&storage.container, &storage.raw_key(RawObject::Products), "");

        let crawler = Arc::new(LocalSchemaCrawler::new(blob.clone()));
        let stage = CatalogRefreshController::new(
            crawler.clone(),
            &CatalogConfig::default(),
            &storage,
        );
        let ctx = stage_context(StageName::CatalogRefresh);

        let err = stage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogJobFailed);

        blob.insert(
            &storage.container,
            &storage.raw_key(RawObject::Products),
            fixtures::PRODUCTS_CSV,
        );
        let output = stage.execute(&ctx).await.unwrap();
        assert_eq!(output.get("started"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_poll_bound_yields_timeout() {
        let crawler = Arc::new(
            InMemoryCrawler::new()
                .with_crawler("retail_data_crawler", CrawlerState::Ready)
                .never_finishes(),
        );
        let clock = Arc::new(ManualClock::new());
        let stage = controller(crawler, 4);

        let err = stage
            .execute(&stage_context_with_clock(StageName::CatalogRefresh, clock.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::CatalogTimeout { polls: 4, .. }));
        assert_eq!(clock.total_slept(), SECS_30 * 5);
    }
}
