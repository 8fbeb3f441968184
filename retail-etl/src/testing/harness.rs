//! A fully wired in-memory pipeline.

use super::fixtures::{memory_config, seed_raw_zone};
use super::mocks::RecordingNotifier;
use crate::blob::InMemoryBlobStore;
use crate::config::EtlConfig;
use crate::crawler::InMemoryCrawler;
use crate::errors::EtlError;
use crate::events::CollectingEventSink;
use crate::pipeline::{Collaborators, Orchestrator, RetryConfig};
use crate::utils::ManualClock;
use crate::warehouse::MemoryWarehouse;
use std::sync::Arc;

/// In-memory collaborators, a manual clock and recording sinks around the
/// real retail pipeline.
///
/// The raw zone is seeded with the sample extracts unless built with
/// [`RetailHarness::without_inputs`].
#[derive(Debug)]
pub struct RetailHarness {
    config: EtlConfig,
    blob: Arc<InMemoryBlobStore>,
    crawler: Arc<InMemoryCrawler>,
    warehouse: MemoryWarehouse,
    clock: Arc<ManualClock>,
    events: Arc<CollectingEventSink>,
    notifier: Arc<RecordingNotifier>,
}

impl Default for RetailHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl RetailHarness {
    /// Creates a harness with the sample extracts in the raw zone.
    #[must_use]
    pub fn new() -> Self {
        let harness = Self::without_inputs();
        seed_raw_zone(&harness.blob, &harness.config.storage);
        harness
    }

    /// Creates a harness with an empty blob store.
    #[must_use]
    pub fn without_inputs() -> Self {
        let blob = Arc::new(InMemoryBlobStore::new());
        Self {
            config: memory_config(),
            warehouse: MemoryWarehouse::new(blob.clone()),
            blob,
            crawler: Arc::new(InMemoryCrawler::new()),
            clock: Arc::new(ManualClock::new()),
            events: Arc::new(CollectingEventSink::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    /// Replaces the crawler simulation.
    #[must_use]
    pub fn with_crawler(mut self, crawler: InMemoryCrawler) -> Self {
        self.crawler = Arc::new(crawler);
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// The blob store.
    #[must_use]
    pub fn blob(&self) -> &InMemoryBlobStore {
        &self.blob
    }

    /// The crawler simulation.
    #[must_use]
    pub fn crawler(&self) -> &InMemoryCrawler {
        &self.crawler
    }

    /// The warehouse.
    #[must_use]
    pub fn warehouse(&self) -> &MemoryWarehouse {
        &self.warehouse
    }

    /// The manual clock.
    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Lifecycle events emitted so far.
    #[must_use]
    pub fn events(&self) -> &CollectingEventSink {
        &self.events
    }

    /// Failure notices sent so far.
    #[must_use]
    pub fn notifier(&self) -> &RecordingNotifier {
        &self.notifier
    }

    /// The collaborators the pipeline is wired to.
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            blob: self.blob.clone(),
            crawler: self.crawler.clone(),
            warehouse: Arc::new(self.warehouse.clone()),
        }
    }

    /// Builds an orchestrator over the harness collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn orchestrator(&self) -> Result<Orchestrator, EtlError> {
        Ok(Orchestrator::from_config(&self.config, &self.collaborators())?
            .with_clock(self.clock.clone())
            .with_event_sink(self.events.clone())
            .with_notifier(self.notifier.clone()))
    }
}
