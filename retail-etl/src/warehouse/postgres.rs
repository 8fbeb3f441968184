//! Warehouse adapter speaking the Postgres wire protocol (Redshift).

use super::{Statement, Warehouse, WarehouseConnection};
use crate::errors::WarehouseError;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use std::fmt;
use tracing::debug;

/// Connection parameters for [`PgWarehouse`].
#[derive(Clone)]
pub struct PgWarehouseOptions {
    /// Cluster endpoint host.
    pub host: String,
    /// Port (5439 for Redshift).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Require TLS.
    pub require_tls: bool,
}

impl fmt::Debug for PgWarehouseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgWarehouseOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("require_tls", &self.require_tls)
            .finish()
    }
}

/// Warehouse reached over the Postgres protocol.
///
/// Each [`Warehouse::connect`] opens a dedicated connection; statements are
/// sent as rendered SQL.
#[derive(Debug, Clone)]
pub struct PgWarehouse {
    options: PgWarehouseOptions,
}

impl PgWarehouse {
    /// Creates an adapter; no connection is opened until `connect`.
    #[must_use]
    pub fn new(options: PgWarehouseOptions) -> Self {
        Self { options }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let o = &self.options;
        PgConnectOptions::new()
            .host(&o.host)
            .port(o.port)
            .database(&o.database)
            .username(&o.user)
            .password(&o.password)
            .ssl_mode(if o.require_tls {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            })
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError> {
        let conn = PgConnection::connect_with(&self.connect_options())
            .await
            .map_err(|e| {
                WarehouseError::Connection(format!(
                    "{}:{}/{}: {e}",
                    self.options.host, self.options.port, self.options.database
                ))
            })?;
        debug!(host = %self.options.host, database = %self.options.database, "Warehouse connection opened");
        Ok(Box::new(PgSession {
            conn,
            in_transaction: false,
        }))
    }
}

struct PgSession {
    conn: PgConnection,
    in_transaction: bool,
}

impl PgSession {
    async fn raw(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WarehouseConnection for PgSession {
    async fn begin(&mut self) -> Result<(), WarehouseError> {
        if self.in_transaction {
            return Err(WarehouseError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        self.raw("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, WarehouseError> {
        let sql = statement.to_sql();
        self.raw(&sql)
            .await
            .map_err(|e| WarehouseError::statement(statement.label(), e.to_string()))
    }

    async fn commit(&mut self) -> Result<(), WarehouseError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.raw("COMMIT")
            .await
            .map_err(|e| WarehouseError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), WarehouseError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.raw("ROLLBACK").await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        self.conn.close().await?;
        Ok(())
    }
}
