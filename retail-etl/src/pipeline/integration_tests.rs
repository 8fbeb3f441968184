//! End-to-end tests over the in-memory harness.

#[cfg(test)]
mod tests {
    use crate::blob::BlobStore;
    use crate::core::{Relation, StageName};
    use crate::crawler::{CrawlerState, InMemoryCrawler};
    use crate::errors::{ErrorKind, EtlError};
    use crate::pipeline::RetryConfig;
    use crate::testing::{fixtures, RetailHarness};
    use crate::warehouse::{FaultPoint, Value};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const CONTAINER: &str = "retail-data";

    fn processed(harness: &RetailHarness, relation: Relation) -> String {
        harness
            .blob()
            .text(CONTAINER, &format!("processed/{relation}/data000"))
            .unwrap_or_default()
    }

    fn date_row(harness: &RetailHarness, date_key: i64) -> Vec<Value> {
        harness
            .warehouse()
            .rows(Relation::DimDate)
            .into_iter()
            .find(|row| row[0] == Value::Int(date_key))
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_counts() {
        let harness = RetailHarness::new();
        let report = harness.orchestrator().unwrap().run().await.unwrap();

        assert!(report.succeeded(5));
        let warehouse = harness.warehouse();
        assert_eq!(warehouse.row_count(Relation::DimCustomers), 3);
        assert_eq!(warehouse.row_count(Relation::DimProducts), 2);
        assert_eq!(
            warehouse.row_count(Relation::FactOrders),
            fixtures::VALID_ORDER_LINES as usize
        );
        assert!(warehouse.row_count(Relation::DimDate) <= 5);

        let load = report.stage(StageName::Load).unwrap();
        assert_eq!(load.output.count("stg_orders"), Some(6));
        let publish = report.stage(StageName::Publish).unwrap();
        assert_eq!(publish.output.get("fact_orders").unwrap()["rows"], 5);
    }

    #[tokio::test]
    async fn test_weekend_flags() {
        let harness = RetailHarness::new();
        harness.orchestrator().unwrap().run().await.unwrap();

        let saturday = date_row(&harness, 20_250_104);
        let monday = date_row(&harness, 20_250_106);
        let is_weekend = Relation::DimDate.column_index("is_weekend").unwrap();
        assert_eq!(saturday[is_weekend], Value::Bool(true));
        assert_eq!(monday[is_weekend], Value::Bool(false));
        let quarter = Relation::DimDate.column_index("quarter").unwrap();
        assert_eq!(monday[quarter], Value::Int(1));
    }

    #[tokio::test]
    async fn test_orphan_order_is_not_published() {
        let harness = RetailHarness::new();
        harness.orchestrator().unwrap().run().await.unwrap();

        let order_ids = harness.warehouse().column(Relation::FactOrders, "order_id");
        assert!(!order_ids.contains(&Value::Int(fixtures::ORPHAN_ORDER_ID)));
        assert!(!processed(&harness, Relation::FactOrders).contains("\n1006,"));
    }

    #[tokio::test]
    async fn test_publish_writes_ordered_csv_with_header() {
        let harness = RetailHarness::new();
        harness.orchestrator().unwrap().run().await.unwrap();

        let dates = processed(&harness, Relation::DimDate);
        let lines: Vec<&str> = dates.lines().collect();
        assert_eq!(lines[0], "date_key,full_date,year,month,day,quarter,is_weekend");
        let keys: Vec<&str> = lines[1..].iter().map(|l| &l[..8]).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);

        let facts = processed(&harness, Relation::FactOrders);
        assert!(facts.starts_with("order_id,customer_key,product_key,date_key,"));
        assert_eq!(facts.lines().count(), 1 + fixtures::VALID_ORDER_LINES as usize);

        for relation in Relation::PUBLISHED {
            let keys = harness
                .blob()
                .list(CONTAINER, &format!("processed/{relation}/"))
                .await
                .unwrap();
            assert_eq!(keys.len(), 1, "{relation} should be a single file");
        }
    }

    #[tokio::test]
    async fn test_missing_input_names_object() {
        let harness = RetailHarness::new().with_retry(RetryConfig::no_retry());
        harness.blob().remove(CONTAINER, "raw/products.csv");

        let err = harness.orchestrator().unwrap().run().await.unwrap_err();

        assert_eq!(err.failed_stage(), Some(StageName::ValidateInputs));
        let chain = err.report().unwrap().attempts[0]
            .failed_stage()
            .unwrap()
            .error
            .clone()
            .unwrap();
        assert!(chain.contains("'products'"));
        assert_eq!(harness.crawler().calls().len(), 0);
        assert!(harness.warehouse().executed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_staging_empty() {
        let harness = RetailHarness::new().with_retry(RetryConfig::no_retry());
        harness
            .warehouse()
            .fail_on(FaultPoint::statement("COPY stg_orders"), "invalid digit");

        let err = harness.orchestrator().unwrap().run().await.unwrap_err();

        assert_eq!(err.failed_stage(), Some(StageName::Load));
        for relation in [Relation::StgCustomers, Relation::StgProducts, Relation::StgOrders] {
            assert_eq!(harness.warehouse().row_count(relation), 0, "{relation}");
        }
        assert_eq!(harness.warehouse().open_connections(), 0);
    }

    #[tokio::test]
    async fn test_transform_failure_never_publishes() {
        let harness = RetailHarness::new().with_retry(RetryConfig::no_retry());
        harness
            .warehouse()
            .fail_on(FaultPoint::statement("INSERT dim_date"), "division by zero");

        let err = harness.orchestrator().unwrap().run().await.unwrap_err();

        match &err {
            EtlError::StageFailed { stage, source, .. } => {
                assert_eq!(*stage, StageName::Transform);
                assert_eq!(source.kind(), ErrorKind::Transform);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(!harness
            .warehouse()
            .executed()
            .iter()
            .any(|label| label.starts_with("UNLOAD")));
        assert!(harness
            .blob()
            .list(CONTAINER, "processed/")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(harness.notifier().notices().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let harness = RetailHarness::new();
        harness
            .warehouse()
            .fail_times(FaultPoint::Connect, 1, "connection refused");

        let report = harness.orchestrator().unwrap().run().await.unwrap();

        assert_eq!(report.attempts.len(), 2);
        assert_eq!(
            report.attempts[0].failed_stage().unwrap().stage,
            StageName::Load
        );
        assert!(harness.clock().sleeps().contains(&Duration::from_secs(300)));
        assert_eq!(harness.crawler().start_count(), 2);
        assert!(harness.notifier().notices().is_empty());
        assert_eq!(harness.events().events_of_type("run.retrying").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_crawl_fails_run_after_retry() {
        let harness = RetailHarness::new()
            .with_crawler(InMemoryCrawler::new().with_outcome(CrawlerState::Failed));

        let err = harness.orchestrator().unwrap().run().await.unwrap_err();

        assert!(matches!(
            err,
            EtlError::StageFailed { stage: StageName::CatalogRefresh, attempts: 2, .. }
        ));
        // The retry starts a fresh crawl instead of trusting the stale FAILED.
        assert_eq!(harness.crawler().start_count(), 2);
        assert!(harness.clock().sleeps().contains(&Duration::from_secs(300)));
        assert!(harness.warehouse().executed().is_empty());

        let notices = harness.notifier().notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, Some(ErrorKind::CatalogJobFailed));
        assert_eq!(notices[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_stale_failed_crawler_is_recrawled() {
        let harness = RetailHarness::new().with_crawler(
            InMemoryCrawler::new().with_crawler("retail_data_crawler", CrawlerState::Failed),
        );

        let report = harness.orchestrator().unwrap().run().await.unwrap();

        assert_eq!(report.attempts.len(), 1);
        assert_eq!(harness.crawler().start_count(), 1);
        assert_eq!(harness.warehouse().row_count(Relation::FactOrders), 5);
    }

    #[tokio::test]
    async fn test_running_crawler_is_awaited() {
        let harness = RetailHarness::new().with_crawler(
            InMemoryCrawler::new().with_crawler("retail_data_crawler", CrawlerState::Running),
        );

        harness.orchestrator().unwrap().run().await.unwrap();

        assert_eq!(harness.crawler().create_count(), 0);
        assert_eq!(harness.crawler().start_count(), 0);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent_and_releases_connections() {
        let harness = RetailHarness::new();
        let orchestrator = harness.orchestrator().unwrap();
        orchestrator.run().await.unwrap();
        orchestrator.run().await.unwrap();

        assert_eq!(harness.warehouse().row_count(Relation::StgOrders), 6);
        assert_eq!(harness.warehouse().row_count(Relation::DimCustomers), 3);
        assert_eq!(harness.crawler().create_count(), 1);
        assert_eq!(harness.warehouse().open_connections(), 0);
        // One connection each for load, transform and publish per run.
        assert_eq!(harness.warehouse().connections_opened(), 6);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let harness = RetailHarness::new();
        harness.orchestrator().unwrap().run().await.unwrap();

        let kinds = harness.events().kinds();
        assert_eq!(kinds.first().copied(), Some("run.started"));
        assert_eq!(kinds.last().copied(), Some("run.completed"));
        let started: Vec<_> = harness
            .events()
            .events_of_type("stage.started")
            .into_iter()
            .filter_map(|e| e.stage)
            .collect();
        assert_eq!(started, StageName::ALL.to_vec());
    }
}
