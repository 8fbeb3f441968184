//! Typed warehouse statements and their Redshift SQL rendering.
//!
//! Stages build [`Statement`] values rather than SQL strings. A SQL
//! warehouse executes [`Statement::to_sql`]; the in-memory warehouse
//! interprets the typed form directly.

use super::schema;
use crate::core::Relation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// File format for bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileFormat {
    /// Comma-separated values, one row per line.
    #[default]
    Csv,
}

/// Bulk-load of one object into a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoad {
    /// Target relation.
    pub target: Relation,
    /// Source object URI.
    pub source: String,
    /// Role the warehouse assumes to read the source.
    pub iam_role: String,
    /// Source format.
    pub format: FileFormat,
    /// Number of leading lines to skip.
    pub ignore_header: u32,
}

impl BulkLoad {
    /// CSV load skipping one header row.
    #[must_use]
    pub fn csv(target: Relation, source: impl Into<String>, iam_role: impl Into<String>) -> Self {
        Self {
            target,
            source: source.into(),
            iam_role: iam_role.into(),
            format: FileFormat::Csv,
            ignore_header: 1,
        }
    }
}

/// The query an unload exports: a whole relation in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportQuery {
    /// Relation to export.
    pub relation: Relation,
    /// Column the output is ordered by.
    pub order_by: String,
}

impl ExportQuery {
    /// Exports a relation ordered by its sort key.
    #[must_use]
    pub fn ordered(relation: Relation) -> Self {
        Self {
            relation,
            order_by: relation.sort_key().to_string(),
        }
    }

    /// Renders the query as SQL.
    #[must_use]
    pub fn to_sql(&self) -> String {
        format!("SELECT * FROM {} ORDER BY {}", self.relation, self.order_by)
    }
}

/// Bulk-unload of a query result to object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkUnload {
    /// Query to export.
    pub query: ExportQuery,
    /// Destination URI prefix.
    pub destination: String,
    /// Role the warehouse assumes to write the destination.
    pub iam_role: String,
    /// Output format.
    pub format: FileFormat,
    /// Whether to write a header row.
    pub header: bool,
    /// Whether the warehouse may split output across files.
    pub parallel: bool,
    /// Whether existing objects at the destination may be replaced.
    pub allow_overwrite: bool,
}

impl BulkUnload {
    /// Single-file CSV unload with header, overwriting previous output.
    #[must_use]
    pub fn csv(
        relation: Relation,
        destination: impl Into<String>,
        iam_role: impl Into<String>,
    ) -> Self {
        Self {
            query: ExportQuery::ordered(relation),
            destination: destination.into(),
            iam_role: iam_role.into(),
            format: FileFormat::Csv,
            header: true,
            parallel: false,
            allow_overwrite: true,
        }
    }
}

/// The four set-based steps building the star schema, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformStep {
    /// `dim_customers` from `stg_customers`.
    DimCustomers,
    /// `dim_products` from `stg_products`.
    DimProducts,
    /// `dim_date` from distinct order dates.
    DimDate,
    /// `fact_orders` joining orders to the dimensions.
    FactOrders,
}

const DIM_CUSTOMERS_SQL: &str = "\
INSERT INTO dim_customers (customer_id, first_name, last_name, email, registration_date)
SELECT
    customer_id,
    first_name,
    last_name,
    email,
    CAST(registration_date AS TIMESTAMP)
FROM stg_customers;";

const DIM_PRODUCTS_SQL: &str = "\
INSERT INTO dim_products (product_id, product_name, category, price, stock_quantity)
SELECT product_id, product_name, category, price, stock_quantity
FROM stg_products;";

const DIM_DATE_SQL: &str = "\
INSERT INTO dim_date (date_key, full_date, year, month, day, quarter, is_weekend)
SELECT DISTINCT
    CAST(TO_CHAR(CAST(order_date AS TIMESTAMP), 'YYYYMMDD') AS INTEGER) AS date_key,
    CAST(order_date AS DATE) AS full_date,
    EXTRACT(year FROM CAST(order_date AS TIMESTAMP)) AS year,
    EXTRACT(month FROM CAST(order_date AS TIMESTAMP)) AS month,
    EXTRACT(day FROM CAST(order_date AS TIMESTAMP)) AS day,
    EXTRACT(quarter FROM CAST(order_date AS TIMESTAMP)) AS quarter,
    CASE WHEN EXTRACT(DOW FROM CAST(order_date AS TIMESTAMP)) IN (0, 6) THEN TRUE ELSE FALSE END AS is_weekend
FROM stg_orders;";

const FACT_ORDERS_SQL: &str = "\
INSERT INTO fact_orders (
    order_id, customer_key, product_key, date_key,
    quantity, unit_price, total_amount
)
SELECT
    o.order_id,
    c.customer_key,
    p.product_key,
    CAST(TO_CHAR(CAST(o.order_date AS TIMESTAMP), 'YYYYMMDD') AS INTEGER) AS date_key,
    o.quantity,
    o.unit_price,
    o.total_amount
FROM stg_orders o
JOIN dim_customers c ON o.customer_id = c.customer_id
JOIN dim_products p ON o.product_id = p.product_id;";

impl TransformStep {
    /// Steps in the order they must run.
    pub const ORDERED: [Self; 4] = [
        Self::DimCustomers,
        Self::DimProducts,
        Self::DimDate,
        Self::FactOrders,
    ];

    /// Returns the relation the step populates.
    #[must_use]
    pub const fn target(&self) -> Relation {
        match self {
            Self::DimCustomers => Relation::DimCustomers,
            Self::DimProducts => Relation::DimProducts,
            Self::DimDate => Relation::DimDate,
            Self::FactOrders => Relation::FactOrders,
        }
    }

    /// Returns the step's SQL.
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::DimCustomers => DIM_CUSTOMERS_SQL,
            Self::DimProducts => DIM_PRODUCTS_SQL,
            Self::DimDate => DIM_DATE_SQL,
            Self::FactOrders => FACT_ORDERS_SQL,
        }
    }
}

/// A statement the pipeline issues against the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Create a relation if it does not exist.
    CreateTable(Relation),
    /// Delete every row of a relation, inside the current transaction.
    ///
    /// `DELETE` rather than `TRUNCATE`: Redshift's `TRUNCATE` commits the
    /// open transaction.
    Clear(Relation),
    /// Bulk-load an object into a relation.
    BulkLoad(BulkLoad),
    /// Populate a dimension or fact relation.
    Transform(TransformStep),
    /// Bulk-unload a relation to object storage.
    BulkUnload(BulkUnload),
}

/// Escapes a value for use inside a single-quoted SQL literal.
fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

impl Statement {
    /// Returns a short label for logs and error context.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::CreateTable(r) => format!("CREATE {r}"),
            Self::Clear(r) => format!("DELETE {r}"),
            Self::BulkLoad(load) => format!("COPY {}", load.target),
            Self::Transform(step) => format!("INSERT {}", step.target()),
            Self::BulkUnload(unload) => format!("UNLOAD {}", unload.query.relation),
        }
    }

    /// Renders the statement as Redshift SQL.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::CreateTable(r) => schema::create_table_sql(*r),
            Self::Clear(r) => format!("DELETE FROM {r};"),
            Self::BulkLoad(load) => {
                let FileFormat::Csv = load.format;
                let mut sql = format!(
                    "COPY {}\nFROM '{}'\nIAM_ROLE '{}'\nFORMAT CSV",
                    load.target,
                    quote(&load.source),
                    quote(&load.iam_role),
                );
                if load.ignore_header > 0 {
                    sql.push_str(&format!("\nIGNOREHEADER {}", load.ignore_header));
                }
                sql.push(';');
                sql
            }
            Self::Transform(step) => step.sql().to_string(),
            Self::BulkUnload(unload) => {
                let FileFormat::Csv = unload.format;
                // The query is itself a quoted literal inside UNLOAD.
                let mut sql = format!(
                    "UNLOAD ('{}')\nTO '{}'\nIAM_ROLE '{}'\nCSV",
                    quote(&unload.query.to_sql()),
                    quote(&unload.destination),
                    quote(&unload.iam_role),
                );
                if unload.header {
                    sql.push_str("\nHEADER");
                }
                sql.push_str(if unload.parallel {
                    "\nPARALLEL ON"
                } else {
                    "\nPARALLEL OFF"
                });
                if unload.allow_overwrite {
                    sql.push_str("\nALLOWOVERWRITE");
                }
                sql
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_copy_sql() {
        let stmt = Statement::BulkLoad(BulkLoad::csv(
            Relation::StgCustomers,
            "s3://retail-data/raw/customers.csv",
            "arn:aws:iam::123:role/redshift",
        ));

        assert_eq!(
            stmt.to_sql(),
            "COPY stg_customers\n\
             FROM 's3://retail-data/raw/customers.csv'\n\
             IAM_ROLE 'arn:aws:iam::123:role/redshift'\n\
             FORMAT CSV\n\
             IGNOREHEADER 1;"
        );
        assert_eq!(stmt.label(), "COPY stg_customers");
    }

    #[test]
    fn test_unload_sql() {
        let stmt = Statement::BulkUnload(BulkUnload::csv(
            Relation::DimDate,
            "s3://retail-data/processed/dim_date/data",
            "arn:role",
        ));

        assert_eq!(
            stmt.to_sql(),
            "UNLOAD ('SELECT * FROM dim_date ORDER BY date_key')\n\
             TO 's3://retail-data/processed/dim_date/data'\n\
             IAM_ROLE 'arn:role'\n\
             CSV\n\
             HEADER\n\
             PARALLEL OFF\n\
             ALLOWOVERWRITE"
        );
    }

    #[test]
    fn test_literals_are_escaped() {
        let stmt = Statement::BulkLoad(BulkLoad::csv(
            Relation::StgOrders,
            "s3://b/raw/o'rders.csv",
            "role",
        ));
        assert!(stmt.to_sql().contains("'s3://b/raw/o''rders.csv'"));
    }

    #[test]
    fn test_clear_uses_delete() {
        let sql = Statement::Clear(Relation::StgOrders).to_sql();
        assert_eq!(sql, "DELETE FROM stg_orders;");
    }

    #[test]
    fn test_transform_steps_are_ordered() {
        let targets: Vec<_> = TransformStep::ORDERED.iter().map(TransformStep::target).collect();
        assert_eq!(
            targets,
            vec![
                Relation::DimCustomers,
                Relation::DimProducts,
                Relation::DimDate,
                Relation::FactOrders
            ]
        );
        assert!(TransformStep::FactOrders.sql().contains("JOIN dim_products p"));
        assert!(TransformStep::DimDate.sql().contains("IN (0, 6)"));
    }
}
