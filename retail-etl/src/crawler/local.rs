//! Crawler that infers schemas from CSV headers in a blob store.

use super::{CatalogCrawler, CrawlerDefinition, CrawlerState};
use crate::blob::{BlobStore, ObjectUri};
use crate::errors::CrawlerError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A table published to the catalog by a crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTable {
    /// Catalog database.
    pub database: String,
    /// Table name (the object's file stem).
    pub name: String,
    /// Crawled object URI.
    pub location: String,
    /// Column names from the header row.
    pub columns: Vec<String>,
}

#[derive(Debug)]
struct LocalCrawler {
    definition: CrawlerDefinition,
    state: CrawlerState,
}

type Crawlers = Arc<RwLock<HashMap<String, LocalCrawler>>>;
type Tables = Arc<RwLock<BTreeMap<String, CatalogTable>>>;

/// Crawler running in-process against a [`BlobStore`].
///
/// Each crawl runs in a spawned task that reads the header row of every
/// target object and publishes one [`CatalogTable`] per target. The crawl
/// fails if any target is missing or unreadable.
#[derive(Clone)]
pub struct LocalSchemaCrawler {
    blob: Arc<dyn BlobStore>,
    crawlers: Crawlers,
    tables: Tables,
}

impl std::fmt::Debug for LocalSchemaCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSchemaCrawler")
            .field("crawlers", &self.crawlers.read().len())
            .field("tables", &self.tables.read().len())
            .finish()
    }
}

impl LocalSchemaCrawler {
    /// Creates a crawler service reading from `blob`.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self {
            blob,
            crawlers: Arc::new(RwLock::new(HashMap::new())),
            tables: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Returns every published table, keyed by `database.table`.
    #[must_use]
    pub fn tables(&self) -> BTreeMap<String, CatalogTable> {
        self.tables.read().clone()
    }

    fn set_state(crawlers: &Crawlers, name: &str, state: CrawlerState) {
        if let Some(crawler) = crawlers.write().get_mut(name) {
            crawler.state = state;
        }
    }
}

async fn crawl_target(
    blob: &dyn BlobStore,
    database: &str,
    target: &str,
) -> Result<CatalogTable, String> {
    let uri = ObjectUri::parse(target).map_err(|e| e.to_string())?;
    let data = blob
        .get(&uri.container, &uri.key)
        .await
        .map_err(|e| e.to_string())?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data.as_slice());
    let columns = reader
        .headers()
        .map_err(|e| format!("unreadable header in {target}: {e}"))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    if columns.is_empty() || columns.iter().all(String::is_empty) {
        return Err(format!("no header row in {target}"));
    }

    let name = Path::new(&uri.key)
        .file_stem()
        .map_or_else(|| uri.key.clone(), |s| s.to_string_lossy().into_owned());

    Ok(CatalogTable {
        database: database.to_string(),
        name,
        location: target.to_string(),
        columns,
    })
}

#[async_trait]
impl CatalogCrawler for LocalSchemaCrawler {
    async fn create(&self, definition: &CrawlerDefinition) -> Result<(), CrawlerError> {
        let mut crawlers = self.crawlers.write();
        if crawlers.contains_key(&definition.name) {
            return Err(CrawlerError::AlreadyExists(definition.name.clone()));
        }
        crawlers.insert(
            definition.name.clone(),
            LocalCrawler {
                definition: definition.clone(),
                state: CrawlerState::Ready,
            },
        );
        debug!(crawler = %definition.name, targets = definition.targets.len(), "Crawler created");
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), CrawlerError> {
        let definition = {
            let mut crawlers = self.crawlers.write();
            let crawler = crawlers
                .get_mut(name)
                .ok_or_else(|| CrawlerError::NotFound(name.to_string()))?;
            if crawler.state == CrawlerState::Running {
                return Err(CrawlerError::AlreadyRunning(name.to_string()));
            }
            crawler.state = CrawlerState::Running;
            crawler.definition.clone()
        };

        let blob = self.blob.clone();
        let crawlers = self.crawlers.clone();
        let tables = self.tables.clone();

        tokio::spawn(async move {
            let mut crawled = Vec::with_capacity(definition.targets.len());
            for target in &definition.targets {
                match crawl_target(blob.as_ref(), &definition.database, target).await {
                    Ok(table) => crawled.push(table),
                    Err(reason) => {
                        warn!(crawler = %definition.name, target = %target, %reason, "Crawl failed");
                        Self::set_state(&crawlers, &definition.name, CrawlerState::Failed);
                        return;
                    }
                }
            }

            {
                let mut tables = tables.write();
                for table in crawled {
                    tables.insert(format!("{}.{}", table.database, table.name), table);
                }
            }
            info!(crawler = %definition.name, "Crawl completed");
            Self::set_state(&crawlers, &definition.name, CrawlerState::Ready);
        });

        Ok(())
    }

    async fn get_state(&self, name: &str) -> Result<CrawlerState, CrawlerError> {
        Ok(self
            .crawlers
            .read()
            .get(name)
            .map_or(CrawlerState::NotExists, |c| c.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use std::time::Duration;

    fn definition(targets: Vec<&str>) -> CrawlerDefinition {
        CrawlerDefinition {
            name: "crawler".to_string(),
            role: "role".to_string(),
            database: "retail".to_string(),
            targets: targets.into_iter().map(String::from).collect(),
        }
    }

    async fn wait_until_idle(crawler: &LocalSchemaCrawler) -> CrawlerState {
        for _ in 0..100 {
            let state = crawler.get_state("crawler").await.unwrap();
            if state != CrawlerState::Running {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        CrawlerState::Running
    }

    #[tokio::test]
    async fn test_crawl_publishes_headers() {
        let blob = Arc::new(
            InMemoryBlobStore::new()
                .with_object("b", "raw/orders.csv", "order_id,customer_id\n1,2\n"),
        );
        let crawler = LocalSchemaCrawler::new(blob);
        crawler
            .create(&definition(vec!["memory://b/raw/orders.csv"]))
            .await
            .unwrap();
        crawler.start("crawler").await.unwrap();

        assert_eq!(wait_until_idle(&crawler).await, CrawlerState::Ready);
        let tables = crawler.tables();
        let orders = tables.get("retail.orders").unwrap();
        assert_eq!(orders.columns, vec!["order_id", "customer_id"]);
    }

    #[tokio::test]
    async fn test_missing_target_fails_crawl() {
        let blob = Arc::new(InMemoryBlobStore::new());
        let crawler = LocalSchemaCrawler::new(blob);
        crawler
            .create(&definition(vec!["memory://b/raw/orders.csv"]))
            .await
            .unwrap();
        crawler.start("crawler").await.unwrap();

        assert_eq!(wait_until_idle(&crawler).await, CrawlerState::Failed);
        assert!(crawler.tables().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_crawler() {
        let crawler = LocalSchemaCrawler::new(Arc::new(InMemoryBlobStore::new()));
        assert_eq!(
            crawler.get_state("nope").await.unwrap(),
            CrawlerState::NotExists
        );
        assert!(matches!(
            crawler.start("nope").await,
            Err(CrawlerError::NotFound(_))
        ));
    }
}
