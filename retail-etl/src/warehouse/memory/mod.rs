//! In-process warehouse for tests and local runs.
//!
//! Bulk statements read and write through a [`BlobStore`], so a run against
//! an in-memory or local blob store exercises the same object layout as a
//! run against S3 and Redshift.

mod engine;
mod value;

pub use value::Value;

use super::{Statement, Warehouse, WarehouseConnection};
use crate::blob::{BlobStore, ObjectUri};
use crate::core::Relation;
use crate::errors::WarehouseError;
use async_trait::async_trait;
use engine::Tables;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Where an injected fault fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultPoint {
    /// Opening a connection.
    Connect,
    /// Committing a transaction.
    Commit,
    /// Executing the statement with this label (e.g. `COPY stg_orders`).
    Statement(String),
}

impl FaultPoint {
    /// Fault on the statement with the given label.
    #[must_use]
    pub fn statement(label: impl Into<String>) -> Self {
        Self::Statement(label.into())
    }
}

#[derive(Debug)]
struct Fault {
    point: FaultPoint,
    message: String,
    remaining: Option<u32>,
}

struct Shared {
    blob: Arc<dyn BlobStore>,
    tables: Mutex<Tables>,
    faults: Mutex<Vec<Fault>>,
    executed: Mutex<Vec<String>>,
    open: AtomicUsize,
    opened: AtomicUsize,
}

impl Shared {
    fn take_fault(&self, point: &FaultPoint) -> Option<String> {
        let mut faults = self.faults.lock();
        let index = faults.iter().position(|f| &f.point == point)?;
        let fault = &mut faults[index];
        let message = fault.message.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        Some(message)
    }
}

/// Warehouse keeping its tables in memory.
///
/// Clones share the same tables. Transactions work on a private copy of
/// the tables that replaces the shared state on commit.
#[derive(Clone)]
pub struct MemoryWarehouse {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWarehouse")
            .field("relations", &self.shared.tables.lock().len())
            .field("open_connections", &self.open_connections())
            .finish()
    }
}

impl MemoryWarehouse {
    /// Creates a warehouse with every pipeline relation already defined.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self::with_tables(blob, engine::full_schema())
    }

    /// Creates a warehouse with no relations.
    #[must_use]
    pub fn without_schema(blob: Arc<dyn BlobStore>) -> Self {
        Self::with_tables(blob, Tables::new())
    }

    fn with_tables(blob: Arc<dyn BlobStore>, tables: Tables) -> Self {
        Self {
            shared: Arc::new(Shared {
                blob,
                tables: Mutex::new(tables),
                faults: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
                open: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
            }),
        }
    }

    /// Fails every operation at `point` with `message`.
    pub fn fail_on(&self, point: FaultPoint, message: impl Into<String>) {
        self.push_fault(point, message.into(), None);
    }

    /// Fails the next `times` operations at `point`.
    pub fn fail_times(&self, point: FaultPoint, times: u32, message: impl Into<String>) {
        if times > 0 {
            self.push_fault(point, message.into(), Some(times));
        }
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
    }

    fn push_fault(&self, point: FaultPoint, message: String, remaining: Option<u32>) {
        self.shared.faults.lock().push(Fault {
            point,
            message,
            remaining,
        });
    }

    /// Labels of every statement executed, in order, including failed ones.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.shared.executed.lock().clone()
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Committed rows of a relation, in insertion order.
    #[must_use]
    pub fn rows(&self, relation: Relation) -> Vec<Vec<Value>> {
        self.shared
            .tables
            .lock()
            .get(&relation)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Committed row count of a relation.
    #[must_use]
    pub fn row_count(&self, relation: Relation) -> usize {
        self.shared
            .tables
            .lock()
            .get(&relation)
            .map_or(0, |t| t.rows.len())
    }

    /// Committed values of one column.
    #[must_use]
    pub fn column(&self, relation: Relation, name: &str) -> Vec<Value> {
        let Some(index) = relation.column_index(name) else {
            return Vec::new();
        };
        self.rows(relation)
            .into_iter()
            .map(|mut row| row.swap_remove(index))
            .collect()
    }

    /// Returns whether a relation is defined.
    #[must_use]
    pub fn has_relation(&self, relation: Relation) -> bool {
        self.shared.tables.lock().contains_key(&relation)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError> {
        if let Some(message) = self.shared.take_fault(&FaultPoint::Connect) {
            return Err(WarehouseError::Connection(message));
        }
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: self.shared.clone(),
            tx: None,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    tx: Option<Tables>,
}

impl MemoryConnection {
    fn write<F>(&mut self, f: F) -> Result<u64, WarehouseError>
    where
        F: FnOnce(&mut Tables) -> Result<u64, WarehouseError>,
    {
        match self.tx.as_mut() {
            Some(tables) => f(tables),
            None => f(&mut *self.shared.tables.lock()),
        }
    }

    fn read<T, F>(&self, f: F) -> Result<T, WarehouseError>
    where
        F: FnOnce(&Tables) -> Result<T, WarehouseError>,
    {
        match self.tx.as_ref() {
            Some(tables) => f(tables),
            None => f(&*self.shared.tables.lock()),
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WarehouseConnection for MemoryConnection {
    async fn begin(&mut self) -> Result<(), WarehouseError> {
        if self.tx.is_some() {
            return Err(WarehouseError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        self.tx = Some(self.shared.tables.lock().clone());
        Ok(())
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, WarehouseError> {
        let label = statement.label();
        trace!(statement = %label, in_transaction = self.tx.is_some(), "Executing statement");
        self.shared.executed.lock().push(label.clone());
        if let Some(message) = self
            .shared
            .take_fault(&FaultPoint::Statement(label.clone()))
        {
            return Err(WarehouseError::statement(label, message));
        }

        match statement {
            Statement::BulkLoad(load) => {
                let uri = ObjectUri::parse(&load.source)?;
                let data = self.shared.blob.get(&uri.container, &uri.key).await?;
                self.write(|tables| {
                    engine::load_csv(tables, load.target, &data, load.ignore_header)
                })
            }
            Statement::BulkUnload(unload) => {
                let (data, rows) =
                    self.read(|tables| engine::export_csv(tables, &unload.query, unload.header))?;
                let dest = ObjectUri::parse(&unload.destination)?;
                if !unload.allow_overwrite
                    && !self
                        .shared
                        .blob
                        .list(&dest.container, &dest.key)
                        .await?
                        .is_empty()
                {
                    return Err(WarehouseError::statement(
                        label,
                        format!("destination {} is not empty", unload.destination),
                    ));
                }
                // Single-file unloads get a numeric part suffix.
                let key = format!("{}000", dest.key);
                self.shared.blob.put(&dest.container, &key, data).await?;
                Ok(rows)
            }
            other => self.write(|tables| engine::apply(tables, other)),
        }
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        if let Some(message) = self.shared.take_fault(&FaultPoint::Commit) {
            self.tx = None;
            return Err(WarehouseError::Transaction(message));
        }
        if let Some(tables) = self.tx.take() {
            *self.shared.tables.lock() = tables;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        self.tx = None;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        drop(self);
        Ok(())
    }
}
