//! Simulated crawler for tests.

use super::{CatalogCrawler, CrawlerDefinition, CrawlerState};
use crate::errors::CrawlerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A recorded call against [`InMemoryCrawler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerCall {
    /// `create(definition)`
    Create(String),
    /// `start(name)`
    Start(String),
    /// `get_state(name)`
    GetState(String),
}

#[derive(Debug)]
struct SimulatedCrawler {
    definition: Option<CrawlerDefinition>,
    state: CrawlerState,
    remaining_polls: Option<u32>,
}

#[derive(Debug)]
struct Inner {
    crawlers: HashMap<String, SimulatedCrawler>,
    polls_per_run: u32,
    outcome: CrawlerState,
    calls: Vec<CrawlerCall>,
}

/// Crawler that simulates the service's state machine in memory.
///
/// After `start` (or for a crawler seeded as running) the next
/// `polls_per_run` calls to `get_state` report `RUNNING`; the following call
/// reports the configured outcome. Every call is recorded.
#[derive(Debug)]
pub struct InMemoryCrawler {
    inner: Mutex<Inner>,
}

impl Default for InMemoryCrawler {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCrawler {
    /// Creates a service with no crawlers that finishes runs after two polls.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                crawlers: HashMap::new(),
                polls_per_run: 2,
                outcome: CrawlerState::Ready,
                calls: Vec::new(),
            }),
        }
    }

    /// Seeds an existing crawler in the given state.
    #[must_use]
    pub fn with_crawler(self, name: &str, state: CrawlerState) -> Self {
        self.inner.lock().crawlers.insert(
            name.to_string(),
            SimulatedCrawler {
                definition: None,
                state,
                remaining_polls: None,
            },
        );
        self
    }

    /// Sets how many polls report `RUNNING` before a run finishes.
    #[must_use]
    pub fn with_polls_per_run(self, polls: u32) -> Self {
        self.inner.lock().polls_per_run = polls;
        self
    }

    /// Sets the terminal state runs finish in.
    #[must_use]
    pub fn with_outcome(self, outcome: CrawlerState) -> Self {
        self.inner.lock().outcome = outcome;
        self
    }

    /// Makes runs never finish.
    #[must_use]
    pub fn never_finishes(self) -> Self {
        self.with_polls_per_run(u32::MAX)
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<CrawlerCall> {
        self.inner.lock().calls.clone()
    }

    /// Returns the number of `start` calls.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.count(|c| matches!(c, CrawlerCall::Start(_)))
    }

    /// Returns the number of `create` calls.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, CrawlerCall::Create(_)))
    }

    /// Returns the number of `get_state` calls.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.count(|c| matches!(c, CrawlerCall::GetState(_)))
    }

    /// Returns the definition a crawler was created with.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<CrawlerDefinition> {
        self.inner
            .lock()
            .crawlers
            .get(name)
            .and_then(|c| c.definition.clone())
    }

    fn count(&self, pred: impl Fn(&CrawlerCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl CatalogCrawler for InMemoryCrawler {
    async fn create(&self, definition: &CrawlerDefinition) -> Result<(), CrawlerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(CrawlerCall::Create(definition.name.clone()));
        if inner.crawlers.contains_key(&definition.name) {
            return Err(CrawlerError::AlreadyExists(definition.name.clone()));
        }
        inner.crawlers.insert(
            definition.name.clone(),
            SimulatedCrawler {
                definition: Some(definition.clone()),
                state: CrawlerState::Ready,
                remaining_polls: None,
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), CrawlerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(CrawlerCall::Start(name.to_string()));
        let crawler = inner
            .crawlers
            .get_mut(name)
            .ok_or_else(|| CrawlerError::NotFound(name.to_string()))?;
        if crawler.state == CrawlerState::Running {
            return Err(CrawlerError::AlreadyRunning(name.to_string()));
        }
        crawler.state = CrawlerState::Running;
        crawler.remaining_polls = None;
        Ok(())
    }

    async fn get_state(&self, name: &str) -> Result<CrawlerState, CrawlerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(CrawlerCall::GetState(name.to_string()));
        let polls_per_run = inner.polls_per_run;
        let outcome = inner.outcome;

        let Some(crawler) = inner.crawlers.get_mut(name) else {
            return Ok(CrawlerState::NotExists);
        };
        if crawler.state == CrawlerState::Running {
            let remaining = crawler.remaining_polls.get_or_insert(polls_per_run);
            if *remaining == 0 {
                crawler.state = outcome;
                crawler.remaining_polls = None;
            } else {
                *remaining -= 1;
            }
        }
        Ok(crawler.state)
    }
}
