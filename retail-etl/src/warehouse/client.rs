//! Scoped warehouse access for stages.

use super::{Statement, Warehouse, WarehouseConnection};
use crate::errors::WarehouseError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A failed scoped operation, labelled with the step that failed.
#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct StatementFailure {
    /// `connect`, `begin`, `commit`, or a statement label.
    pub context: String,
    /// Underlying cause.
    #[source]
    pub source: WarehouseError,
}

impl StatementFailure {
    fn new(context: impl Into<String>, source: WarehouseError) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }
}

/// Runs statement batches on fresh connections.
///
/// Every call opens its own connection and closes it before returning,
/// on success and on failure.
#[derive(Clone)]
pub struct WarehouseClient {
    warehouse: Arc<dyn Warehouse>,
}

impl std::fmt::Debug for WarehouseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseClient").finish_non_exhaustive()
    }
}

impl WarehouseClient {
    /// Creates a client for a warehouse.
    #[must_use]
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Executes `statements` in one transaction.
    ///
    /// Either every statement takes effect or none does. Returns the
    /// affected row count of each statement.
    pub async fn run_transaction(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<u64>, StatementFailure> {
        let mut conn = self.open().await?;
        let result = transact(conn.as_mut(), statements).await;
        if result.is_err() {
            if let Err(e) = conn.rollback().await {
                warn!(error = %e, "Rollback failed");
            }
        }
        release(conn).await;
        result
    }

    /// Executes `statements` one after another in autocommit mode.
    ///
    /// Stops at the first failure; earlier statements stay applied.
    pub async fn run_each(&self, statements: &[Statement]) -> Result<Vec<u64>, StatementFailure> {
        let mut conn = self.open().await?;
        let mut counts = Vec::with_capacity(statements.len());
        let mut result = Ok(());
        for statement in statements {
            match run(conn.as_mut(), statement).await {
                Ok(rows) => counts.push(rows),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        release(conn).await;
        result.map(|()| counts)
    }

    async fn open(&self) -> Result<Box<dyn WarehouseConnection>, StatementFailure> {
        self.warehouse
            .connect()
            .await
            .map_err(|e| StatementFailure::new("connect", e))
    }
}

async fn run(
    conn: &mut dyn WarehouseConnection,
    statement: &Statement,
) -> Result<u64, StatementFailure> {
    let label = statement.label();
    let rows = conn
        .execute(statement)
        .await
        .map_err(|e| StatementFailure::new(label.clone(), e))?;
    debug!(statement = %label, rows, "Statement executed");
    Ok(rows)
}

async fn transact(
    conn: &mut dyn WarehouseConnection,
    statements: &[Statement],
) -> Result<Vec<u64>, StatementFailure> {
    conn.begin()
        .await
        .map_err(|e| StatementFailure::new("begin", e))?;
    let mut counts = Vec::with_capacity(statements.len());
    for statement in statements {
        counts.push(run(conn, statement).await?);
    }
    conn.commit()
        .await
        .map_err(|e| StatementFailure::new("commit", e))?;
    Ok(counts)
}

async fn release(conn: Box<dyn WarehouseConnection>) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Closing warehouse connection failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobStore;
    use crate::core::Relation;
    use crate::warehouse::{BulkLoad, FaultPoint, MemoryWarehouse};

    fn setup() -> (MemoryWarehouse, WarehouseClient) {
        let blob = Arc::new(InMemoryBlobStore::new().with_object(
            "retail",
            "raw/orders.csv",
            "h\n1,2,3,2024-01-01,1,1.00,1.00\n",
        ));
        let warehouse = MemoryWarehouse::new(blob);
        let client = WarehouseClient::new(Arc::new(warehouse.clone()));
        (warehouse, client)
    }

    fn batch() -> Vec<Statement> {
        vec![
            Statement::Clear(Relation::StgOrders),
            Statement::BulkLoad(BulkLoad::csv(
                Relation::StgOrders,
                "memory://retail/raw/orders.csv",
                "role",
            )),
        ]
    }

    #[tokio::test]
    async fn test_transaction_commits() {
        let (warehouse, client) = setup();
        let counts = client.run_transaction(&batch()).await.unwrap();
        assert_eq!(counts, vec![0, 1]);
        assert_eq!(warehouse.row_count(Relation::StgOrders), 1);
        assert_eq!(warehouse.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_transaction_failure_rolls_back_and_releases() {
        let (warehouse, client) = setup();
        client.run_transaction(&batch()).await.unwrap();
        warehouse.fail_on(FaultPoint::statement("COPY stg_orders"), "bad row");

        let failure = client.run_transaction(&batch()).await.unwrap_err();
        assert_eq!(failure.context, "COPY stg_orders");
        // The DELETE before the failing COPY was rolled back.
        assert_eq!(warehouse.row_count(Relation::StgOrders), 1);
        assert_eq!(warehouse.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_labelled() {
        let (warehouse, client) = setup();
        warehouse.fail_on(FaultPoint::Commit, "lost connection");
        let failure = client.run_transaction(&batch()).await.unwrap_err();
        assert_eq!(failure.context, "commit");
        assert_eq!(warehouse.row_count(Relation::StgOrders), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_labelled() {
        let (warehouse, client) = setup();
        warehouse.fail_on(FaultPoint::Connect, "refused");
        let failure = client.run_each(&batch()).await.unwrap_err();
        assert_eq!(failure.context, "connect");
    }

    #[tokio::test]
    async fn test_run_each_stops_at_first_failure() {
        let (warehouse, client) = setup();
        warehouse.fail_on(FaultPoint::statement("COPY stg_orders"), "denied");
        let mut statements = batch();
        statements.push(Statement::Clear(Relation::StgCustomers));

        assert!(client.run_each(&statements).await.is_err());
        assert_eq!(
            warehouse.executed(),
            vec!["DELETE stg_orders", "COPY stg_orders"]
        );
        assert_eq!(warehouse.open_connections(), 0);
    }
}
