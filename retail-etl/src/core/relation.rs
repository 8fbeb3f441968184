//! Raw objects and warehouse relations of the retail star schema.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw CSV extract landed in the raw zone of the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawObject {
    /// `customers.csv`
    Customers,
    /// `products.csv`
    Products,
    /// `orders.csv`
    Orders,
}

impl RawObject {
    /// All raw objects in load order.
    pub const ALL: [Self; 3] = [Self::Customers, Self::Products, Self::Orders];

    /// Returns the logical object name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Products => "products",
            Self::Orders => "orders",
        }
    }

    /// Returns the file name inside the raw prefix.
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Customers => "customers.csv",
            Self::Products => "products.csv",
            Self::Orders => "orders.csv",
        }
    }

    /// Returns the object key under the given raw prefix.
    #[must_use]
    pub fn key(&self, raw_prefix: &str) -> String {
        format!("{}{}", normalize_prefix(raw_prefix), self.file_name())
    }

    /// Returns the staging relation this object is loaded into.
    #[must_use]
    pub const fn staging_relation(&self) -> Relation {
        match self {
            Self::Customers => Relation::StgCustomers,
            Self::Products => Relation::StgProducts,
            Self::Orders => Relation::StgOrders,
        }
    }
}

impl fmt::Display for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ensures a non-empty prefix ends with exactly one `/`.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Role a relation plays in the star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Untransformed mirror of a raw object.
    Staging,
    /// Descriptive dimension.
    Dimension,
    /// Measure-bearing fact.
    Fact,
}

/// Column storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 64-bit integer.
    BigInt,
    /// 32-bit integer.
    Integer,
    /// Fixed-point decimal.
    Decimal,
    /// Variable-length text.
    Varchar,
    /// Timestamp without time zone.
    Timestamp,
    /// Calendar date.
    Date,
    /// Boolean.
    Boolean,
}

impl ColumnType {
    /// Returns the SQL type name.
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Integer => "INTEGER",
            Self::Decimal => "DECIMAL(12,2)",
            Self::Varchar => "VARCHAR(256)",
            Self::Timestamp => "TIMESTAMP",
            Self::Date => "DATE",
            Self::Boolean => "BOOLEAN",
        }
    }
}

/// A column of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Storage type.
    pub ty: ColumnType,
    /// Whether the warehouse assigns the value (surrogate key).
    pub identity: bool,
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        identity: false,
    }
}

const fn identity(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty: ColumnType::BigInt,
        identity: true,
    }
}

use ColumnType::{BigInt, Boolean, Date, Decimal, Integer, Timestamp, Varchar};

const STG_CUSTOMERS: &[ColumnDef] = &[
    col("customer_id", BigInt),
    col("first_name", Varchar),
    col("last_name", Varchar),
    col("email", Varchar),
    col("registration_date", Varchar),
];

const STG_PRODUCTS: &[ColumnDef] = &[
    col("product_id", BigInt),
    col("product_name", Varchar),
    col("category", Varchar),
    col("price", Decimal),
    col("stock_quantity", Integer),
];

const STG_ORDERS: &[ColumnDef] = &[
    col("order_id", BigInt),
    col("customer_id", BigInt),
    col("product_id", BigInt),
    col("order_date", Varchar),
    col("quantity", Integer),
    col("unit_price", Decimal),
    col("total_amount", Decimal),
];

const DIM_CUSTOMERS: &[ColumnDef] = &[
    identity("customer_key"),
    col("customer_id", BigInt),
    col("first_name", Varchar),
    col("last_name", Varchar),
    col("email", Varchar),
    col("registration_date", Timestamp),
];

const DIM_PRODUCTS: &[ColumnDef] = &[
    identity("product_key"),
    col("product_id", BigInt),
    col("product_name", Varchar),
    col("category", Varchar),
    col("price", Decimal),
    col("stock_quantity", Integer),
];

const DIM_DATE: &[ColumnDef] = &[
    col("date_key", Integer),
    col("full_date", Date),
    col("year", Integer),
    col("month", Integer),
    col("day", Integer),
    col("quarter", Integer),
    col("is_weekend", Boolean),
];

const FACT_ORDERS: &[ColumnDef] = &[
    col("order_id", BigInt),
    col("customer_key", BigInt),
    col("product_key", BigInt),
    col("date_key", Integer),
    col("quantity", Integer),
    col("unit_price", Decimal),
    col("total_amount", Decimal),
];

/// A warehouse relation owned by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// `stg_customers`
    StgCustomers,
    /// `stg_products`
    StgProducts,
    /// `stg_orders`
    StgOrders,
    /// `dim_customers`
    DimCustomers,
    /// `dim_products`
    DimProducts,
    /// `dim_date`
    DimDate,
    /// `fact_orders`
    FactOrders,
}

impl Relation {
    /// Every relation, staging first.
    pub const ALL: [Self; 7] = [
        Self::StgCustomers,
        Self::StgProducts,
        Self::StgOrders,
        Self::DimCustomers,
        Self::DimProducts,
        Self::DimDate,
        Self::FactOrders,
    ];

    /// Relations unloaded to the processed zone, in publish order.
    pub const PUBLISHED: [Self; 4] = [
        Self::DimCustomers,
        Self::DimProducts,
        Self::DimDate,
        Self::FactOrders,
    ];

    /// Returns the relation name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StgCustomers => "stg_customers",
            Self::StgProducts => "stg_products",
            Self::StgOrders => "stg_orders",
            Self::DimCustomers => "dim_customers",
            Self::DimProducts => "dim_products",
            Self::DimDate => "dim_date",
            Self::FactOrders => "fact_orders",
        }
    }

    /// Looks a relation up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }

    /// Returns the relation's role in the star schema.
    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        match self {
            Self::StgCustomers | Self::StgProducts | Self::StgOrders => RelationKind::Staging,
            Self::DimCustomers | Self::DimProducts | Self::DimDate => RelationKind::Dimension,
            Self::FactOrders => RelationKind::Fact,
        }
    }

    /// Returns the column layout.
    #[must_use]
    pub const fn columns(&self) -> &'static [ColumnDef] {
        match self {
            Self::StgCustomers => STG_CUSTOMERS,
            Self::StgProducts => STG_PRODUCTS,
            Self::StgOrders => STG_ORDERS,
            Self::DimCustomers => DIM_CUSTOMERS,
            Self::DimProducts => DIM_PRODUCTS,
            Self::DimDate => DIM_DATE,
            Self::FactOrders => FACT_ORDERS,
        }
    }

    /// Returns the key published output is ordered by.
    #[must_use]
    pub const fn sort_key(&self) -> &'static str {
        match self {
            Self::StgCustomers => "customer_id",
            Self::StgProducts => "product_id",
            Self::StgOrders | Self::FactOrders => "order_id",
            Self::DimCustomers => "customer_key",
            Self::DimProducts => "product_key",
            Self::DimDate => "date_key",
        }
    }

    /// Returns the position of a column, if present.
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == column)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
