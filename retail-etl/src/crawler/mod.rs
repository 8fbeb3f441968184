//! Catalog crawler interface and implementations.
//!
//! A crawler infers schema metadata for objects in the raw zone and
//! publishes it to a catalog database. Crawls run asynchronously: `start`
//! returns immediately and callers poll `get_state` until the crawler leaves
//! [`CrawlerState::Running`].

mod local;
mod memory;

pub use local::{CatalogTable, LocalSchemaCrawler};
pub use memory::{CrawlerCall, InMemoryCrawler};

use crate::errors::CrawlerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable state of a named crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlerState {
    /// No crawler with this name is defined.
    NotExists,
    /// Defined and idle.
    Ready,
    /// A crawl is in progress.
    Running,
    /// The last crawl failed.
    Failed,
}

impl fmt::Display for CrawlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotExists => write!(f, "NOT_EXISTS"),
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Definition used to create a crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlerDefinition {
    /// Crawler name.
    pub name: String,
    /// Role the crawler assumes to read the targets.
    pub role: String,
    /// Catalog database receiving the inferred tables.
    pub database: String,
    /// Object URIs to crawl.
    pub targets: Vec<String>,
}

/// The external schema-cataloging service.
#[async_trait]
pub trait CatalogCrawler: Send + Sync {
    /// Creates a crawler definition.
    async fn create(&self, definition: &CrawlerDefinition) -> Result<(), CrawlerError>;

    /// Starts a crawl. Fails if the crawler is already running.
    async fn start(&self, name: &str) -> Result<(), CrawlerError>;

    /// Returns the crawler's current state.
    async fn get_state(&self, name: &str) -> Result<CrawlerState, CrawlerError>;
}
