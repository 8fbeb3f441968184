//! Sample extracts and pre-loaded warehouses.

use super::stage_context;
use crate::blob::InMemoryBlobStore;
use crate::config::{BlobBackend, CatalogBackend, EtlConfig, StorageConfig, WarehouseBackend};
use crate::core::{RawObject, StageName};
use crate::errors::StageError;
use crate::stages::{DimensionalTransformer, Stage, StagingLoader};
use crate::warehouse::{MemoryWarehouse, WarehouseClient};
use std::fmt::Write as _;
use std::sync::Arc;

/// Three customers.
pub const CUSTOMERS_CSV: &str = "\
customer_id,first_name,last_name,email,registration_date
1,Ada,Lovelace,ada@example.com,2024-03-15
2,Alan,Turing,alan@example.com,2024-05-02 08:30:00
3,Grace,Hopper,grace@example.com,2024-07-21
";

/// Two products.
pub const PRODUCTS_CSV: &str = "\
product_id,product_name,category,price,stock_quantity
101,Desk Lamp,Home,19.99,40
102,Notebook,Stationery,5.50,250
";

/// Five valid order lines plus one referencing an unknown customer.
///
/// 2025-01-04 is a Saturday and 2025-01-06 a Monday.
pub const ORDERS_CSV: &str = "\
order_id,customer_id,product_id,order_date,quantity,unit_price,total_amount
1001,1,101,2025-01-04 10:15:00,2,19.99,39.98
1002,2,102,2025-01-04 14:30:00,1,5.50,5.50
1003,3,101,2025-01-06 09:00:00,1,19.99,19.99
1004,1,102,2025-01-06 17:45:00,3,5.50,16.50
1005,2,101,2025-01-07 11:20:00,1,19.99,19.99
1006,9,101,2025-01-08 12:00:00,1,19.99,19.99
";

/// Order lines in [`ORDERS_CSV`] that join to both dimensions.
pub const VALID_ORDER_LINES: u64 = 5;

/// The order in [`ORDERS_CSV`] whose customer does not exist.
pub const ORPHAN_ORDER_ID: i64 = 1006;

/// Returns the sample extract for a raw object.
#[must_use]
pub fn sample_csv(object: RawObject) -> &'static str {
    match object {
        RawObject::Customers => CUSTOMERS_CSV,
        RawObject::Products => PRODUCTS_CSV,
        RawObject::Orders => ORDERS_CSV,
    }
}

/// Configuration using the in-memory backends everywhere.
#[must_use]
pub fn memory_config() -> EtlConfig {
    let mut config = EtlConfig::default();
    config.storage.backend = BlobBackend::Memory;
    config.catalog.backend = CatalogBackend::Memory;
    config.warehouse.backend = WarehouseBackend::Memory;
    config
}

/// Writes the sample extracts into the raw zone of `storage`.
pub fn seed_raw_zone(blob: &InMemoryBlobStore, storage: &StorageConfig) {
    for object in RawObject::ALL {
        blob.insert(&storage.container, &storage.raw_key(object), sample_csv(object));
    }
}

/// A blob store holding the sample extracts.
#[must_use]
pub fn raw_zone(storage: &StorageConfig) -> InMemoryBlobStore {
    let blob = InMemoryBlobStore::new();
    seed_raw_zone(&blob, storage);
    blob
}

/// Generates a customers extract with ids `1..=count`.
#[must_use]
pub fn generated_customers(count: usize) -> String {
    let mut out = String::from("customer_id,first_name,last_name,email,registration_date\n");
    for i in 1..=count {
        let _ = writeln!(
            out,
            "{i},First{i},Last{i},user{i}@example.com,2024-{:02}-{:02}",
            i % 12 + 1,
            i % 28 + 1
        );
    }
    out
}

/// Generates a products extract with ids `101..101 + count`.
#[must_use]
pub fn generated_products(count: usize) -> String {
    let mut out = String::from("product_id,product_name,category,price,stock_quantity\n");
    for i in 0..count {
        let _ = writeln!(out, "{},Product {i},Category {},9.99,{}", 101 + i, i % 4, i * 3);
    }
    out
}

/// Generates an orders extract with `lines` rows over `customers` customers
/// and `products` products, spread across one quarter.
#[must_use]
pub fn generated_orders(lines: usize, customers: usize, products: usize) -> String {
    let mut out = String::from(
        "order_id,customer_id,product_id,order_date,quantity,unit_price,total_amount\n",
    );
    for i in 0..lines {
        let quantity = i % 5 + 1;
        let _ = writeln!(
            out,
            "{},{},{},2025-{:02}-{:02} 12:00:00,{},9.99,{:.2}",
            i + 1,
            i % customers.max(1) + 1,
            101 + i % products.max(1),
            i % 3 + 1,
            i % 28 + 1,
            quantity,
            9.99 * quantity as f64,
        );
    }
    out
}

/// Warehouse whose staging relations hold the sample extracts.
///
/// # Errors
///
/// Returns the load error if the sample extracts do not load.
pub async fn loaded_warehouse() -> Result<MemoryWarehouse, StageError> {
    let (warehouse, _) = load_into(Arc::new(InMemoryBlobStore::new())).await?;
    Ok(warehouse)
}

/// Warehouse with the star schema built from the sample extracts.
///
/// The extracts are seeded into `blob` under container `retail`, so a
/// publisher configured for that container writes back into `blob`.
///
/// # Errors
///
/// Returns the load or transform error.
pub async fn transformed_warehouse(
    blob: Arc<InMemoryBlobStore>,
) -> Result<MemoryWarehouse, StageError> {
    let (warehouse, client) = load_into(blob).await?;
    DimensionalTransformer::new(client)
        .execute(&stage_context(StageName::Transform))
        .await?;
    Ok(warehouse)
}

async fn load_into(
    blob: Arc<InMemoryBlobStore>,
) -> Result<(MemoryWarehouse, WarehouseClient), StageError> {
    let mut storage = memory_config().storage;
    storage.container = "retail".to_string();
    seed_raw_zone(&blob, &storage);

    let warehouse = MemoryWarehouse::new(blob);
    let client = WarehouseClient::new(Arc::new(warehouse.clone()));
    StagingLoader::new(client.clone(), &storage, "role")
        .execute(&stage_context(StageName::Load))
        .await?;
    Ok((warehouse, client))
}
