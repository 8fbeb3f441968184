//! Warehouse access: connections, typed statements and implementations.
//!
//! A [`Warehouse`] hands out [`WarehouseConnection`]s. Connections start in
//! autocommit mode; [`WarehouseConnection::begin`] opens an explicit
//! transaction that lasts until `commit` or `rollback`. Stages never drive
//! connections directly. They go through [`WarehouseClient`], which scopes
//! transactions and always releases the connection.

mod client;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
pub mod schema;
mod statement;

pub use client::{StatementFailure, WarehouseClient};
pub use memory::{FaultPoint, MemoryWarehouse, Value};
#[cfg(feature = "postgres")]
pub use postgres::{PgWarehouse, PgWarehouseOptions};
pub use statement::{BulkLoad, BulkUnload, ExportQuery, FileFormat, Statement, TransformStep};

use crate::errors::WarehouseError;
use async_trait::async_trait;

/// An open session with the warehouse.
#[async_trait]
pub trait WarehouseConnection: Send {
    /// Opens an explicit transaction.
    async fn begin(&mut self) -> Result<(), WarehouseError>;

    /// Executes a statement and returns the number of affected rows.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, WarehouseError>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), WarehouseError>;

    /// Discards the open transaction.
    async fn rollback(&mut self) -> Result<(), WarehouseError>;

    /// Closes the session. An open transaction is discarded.
    async fn close(self: Box<Self>) -> Result<(), WarehouseError>;
}

/// A warehouse endpoint.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Opens a new connection.
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError>;
}
