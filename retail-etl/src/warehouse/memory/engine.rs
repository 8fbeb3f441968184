//! Statement interpretation over in-memory tables.
//!
//! Every function computes its full result before mutating a table, so a
//! failing statement leaves the tables untouched.

use super::value::Value;
use crate::core::Relation;
use crate::errors::WarehouseError;
use crate::warehouse::{ExportQuery, Statement, TransformStep};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub(super) type Row = Vec<Value>;

#[derive(Debug, Clone)]
pub(super) struct Table {
    pub(super) rows: Vec<Row>,
    next_identity: i64,
}

impl Table {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_identity: 1,
        }
    }
}

pub(super) type Tables = BTreeMap<Relation, Table>;

/// Creates every relation.
pub(super) fn full_schema() -> Tables {
    Relation::ALL.into_iter().map(|r| (r, Table::new())).collect()
}

fn table(tables: &Tables, relation: Relation) -> Result<&Table, WarehouseError> {
    tables
        .get(&relation)
        .ok_or_else(|| WarehouseError::UnknownRelation(relation.to_string()))
}

fn table_mut(tables: &mut Tables, relation: Relation) -> Result<&mut Table, WarehouseError> {
    tables
        .get_mut(&relation)
        .ok_or_else(|| WarehouseError::UnknownRelation(relation.to_string()))
}

fn column(relation: Relation, name: &str) -> Result<usize, WarehouseError> {
    relation.column_index(name).ok_or_else(|| {
        WarehouseError::statement(
            relation.to_string(),
            format!("column \"{name}\" does not exist"),
        )
    })
}

/// Applies a statement that only touches tables.
pub(super) fn apply(tables: &mut Tables, statement: &Statement) -> Result<u64, WarehouseError> {
    match statement {
        Statement::CreateTable(relation) => {
            tables.entry(*relation).or_insert_with(Table::new);
            Ok(0)
        }
        Statement::Clear(relation) => {
            let table = table_mut(tables, *relation)?;
            let removed = table.rows.len() as u64;
            table.rows.clear();
            Ok(removed)
        }
        Statement::Transform(step) => transform(tables, *step),
        Statement::BulkLoad(_) | Statement::BulkUnload(_) => Err(WarehouseError::statement(
            statement.label(),
            "bulk statements need object storage",
        )),
    }
}

/// Appends CSV rows to a relation.
pub(super) fn load_csv(
    tables: &mut Tables,
    relation: Relation,
    data: &[u8],
    ignore_header: u32,
) -> Result<u64, WarehouseError> {
    let label = format!("COPY {relation}");
    let columns = relation.columns();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut parsed = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| WarehouseError::statement(&label, e.to_string()))?;
        if index < ignore_header as usize {
            continue;
        }
        let line = record.position().map_or(index as u64 + 1, |p| p.line());
        if record.len() != columns.len() {
            return Err(WarehouseError::statement(
                &label,
                format!(
                    "line {line}: expected {} columns, found {}",
                    columns.len(),
                    record.len()
                ),
            ));
        }
        let row = record
            .iter()
            .zip(columns)
            .map(|(field, col)| {
                Value::parse(field, col.ty)
                    .map_err(|e| WarehouseError::statement(&label, format!("line {line}: {e}")))
            })
            .collect::<Result<Row, _>>()?;
        parsed.push(row);
    }

    let table = table_mut(tables, relation)?;
    let loaded = parsed.len() as u64;
    table.rows.extend(parsed);
    Ok(loaded)
}

/// Renders a relation as CSV ordered by the query's key.
pub(super) fn export_csv(
    tables: &Tables,
    query: &ExportQuery,
    header: bool,
) -> Result<(Vec<u8>, u64), WarehouseError> {
    let label = format!("UNLOAD {}", query.relation);
    let key = column(query.relation, &query.order_by)?;
    let mut rows: Vec<&Row> = table(tables, query.relation)?.rows.iter().collect();
    rows.sort_by(|a, b| a[key].sort_cmp(&b[key]));

    let mut writer = csv::Writer::from_writer(Vec::new());
    let io = |e: csv::Error| WarehouseError::statement(&label, e.to_string());
    if header {
        writer
            .write_record(query.relation.columns().iter().map(|c| c.name))
            .map_err(io)?;
    }
    for row in &rows {
        writer
            .write_record(row.iter().map(Value::render))
            .map_err(io)?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| WarehouseError::statement(&label, e.to_string()))?;
    Ok((data, rows.len() as u64))
}

fn insert(tables: &mut Tables, relation: Relation, rows: Vec<Row>) -> Result<u64, WarehouseError> {
    let identity = relation.columns().iter().position(|c| c.identity);
    let table = table_mut(tables, relation)?;
    let inserted = rows.len() as u64;
    for mut row in rows {
        if let Some(position) = identity {
            row.insert(position, Value::Int(table.next_identity));
            table.next_identity += 1;
        }
        table.rows.push(row);
    }
    Ok(inserted)
}

fn cast_timestamp(label: &str, value: &Value) -> Result<Option<NaiveDateTime>, WarehouseError> {
    value
        .to_timestamp()
        .map_err(|e| WarehouseError::statement(label, e))
}

fn date_key(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

fn transform(tables: &mut Tables, step: TransformStep) -> Result<u64, WarehouseError> {
    let label = format!("INSERT {}", step.target());
    let rows = match step {
        TransformStep::DimCustomers => {
            let src = Relation::StgCustomers;
            let reg = column(src, "registration_date")?;
            table(tables, src)?
                .rows
                .iter()
                .map(|row| {
                    let registered = cast_timestamp(&label, &row[reg])?
                        .map_or(Value::Null, Value::Timestamp);
                    let mut out = row[..reg].to_vec();
                    out.push(registered);
                    Ok(out)
                })
                .collect::<Result<Vec<_>, WarehouseError>>()?
        }
        TransformStep::DimProducts => table(tables, Relation::StgProducts)?.rows.clone(),
        TransformStep::DimDate => {
            let src = Relation::StgOrders;
            let order_date = column(src, "order_date")?;
            let mut dates = BTreeSet::new();
            let mut saw_null = false;
            for row in &table(tables, src)?.rows {
                match cast_timestamp(&label, &row[order_date])? {
                    Some(ts) => {
                        dates.insert(ts.date());
                    }
                    None => saw_null = true,
                }
            }
            let mut out: Vec<Row> = dates
                .into_iter()
                .map(|d| {
                    let weekday = d.weekday().num_days_from_sunday();
                    vec![
                        Value::Int(date_key(d)),
                        Value::Date(d),
                        Value::Int(i64::from(d.year())),
                        Value::Int(i64::from(d.month())),
                        Value::Int(i64::from(d.day())),
                        Value::Int(i64::from((d.month() - 1) / 3 + 1)),
                        Value::Bool(weekday == 0 || weekday == 6),
                    ]
                })
                .collect();
            if saw_null {
                out.push(vec![Value::Null; Relation::DimDate.columns().len()]);
            }
            out
        }
        TransformStep::FactOrders => fact_rows(tables, &label)?,
    };
    insert(tables, step.target(), rows)
}

fn keys_by_id(
    tables: &Tables,
    relation: Relation,
    id: &str,
    key: &str,
) -> Result<HashMap<i64, Vec<i64>>, WarehouseError> {
    let id = column(relation, id)?;
    let key = column(relation, key)?;
    let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in &table(tables, relation)?.rows {
        if let (Some(id), Some(key)) = (row[id].as_int(), row[key].as_int()) {
            map.entry(id).or_default().push(key);
        }
    }
    Ok(map)
}

fn fact_rows(tables: &Tables, label: &str) -> Result<Vec<Row>, WarehouseError> {
    let customers = keys_by_id(tables, Relation::DimCustomers, "customer_id", "customer_key")?;
    let products = keys_by_id(tables, Relation::DimProducts, "product_id", "product_key")?;

    let src = Relation::StgOrders;
    let order_id = column(src, "order_id")?;
    let customer_id = column(src, "customer_id")?;
    let product_id = column(src, "product_id")?;
    let order_date = column(src, "order_date")?;
    let quantity = column(src, "quantity")?;
    let unit_price = column(src, "unit_price")?;
    let total = column(src, "total_amount")?;

    let mut out = Vec::new();
    for row in &table(tables, src)?.rows {
        // Inner joins: orders without a matching dimension row are dropped.
        let (Some(cid), Some(pid)) = (row[customer_id].as_int(), row[product_id].as_int()) else {
            continue;
        };
        let (Some(cks), Some(pks)) = (customers.get(&cid), products.get(&pid)) else {
            continue;
        };
        let date = cast_timestamp(label, &row[order_date])?
            .map_or(Value::Null, |ts| Value::Int(date_key(ts.date())));
        for ck in cks {
            for pk in pks {
                out.push(vec![
                    row[order_id].clone(),
                    Value::Int(*ck),
                    Value::Int(*pk),
                    date.clone(),
                    row[quantity].clone(),
                    row[unit_price].clone(),
                    row[total].clone(),
                ]);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUSTOMERS: &str = "customer_id,first_name,last_name,email,registration_date\n\
        1,Ada,Lovelace,ada@example.com,2023-01-05 09:00:00\n\
        2,Alan,Turing,alan@example.com,2023-02-11\n";
    const PRODUCTS: &str = "product_id,product_name,category,price,stock_quantity\n\
        10,Lamp,Home,19.99,5\n";
    const ORDERS: &str = "order_id,customer_id,product_id,order_date,quantity,unit_price,total_amount\n\
        100,1,10,2024-03-02 10:00:00,1,19.99,19.99\n\
        101,2,10,2024-03-04 12:30:00,2,19.99,39.98\n\
        102,9,10,2024-03-04 13:00:00,1,19.99,19.99\n";

    fn loaded() -> Tables {
        let mut tables = full_schema();
        load_csv(&mut tables, Relation::StgCustomers, CUSTOMERS.as_bytes(), 1).unwrap();
        load_csv(&mut tables, Relation::StgProducts, PRODUCTS.as_bytes(), 1).unwrap();
        load_csv(&mut tables, Relation::StgOrders, ORDERS.as_bytes(), 1).unwrap();
        tables
    }

    #[test]
    fn test_load_counts_rows_after_header() {
        let tables = loaded();
        assert_eq!(tables[&Relation::StgOrders].rows.len(), 3);
        assert_eq!(tables[&Relation::StgProducts].rows[0][3], Value::Decimal(19.99));
    }

    #[test]
    fn test_load_rejects_wrong_width_without_partial_rows() {
        let mut tables = full_schema();
        let data = b"h\n1,Lamp,Home,1.00,2\n2,Short\n";
        let err = load_csv(&mut tables, Relation::StgProducts, data, 1).unwrap_err();
        assert!(err.to_string().contains("expected 5 columns"));
        assert!(tables[&Relation::StgProducts].rows.is_empty());
    }

    #[test]
    fn test_transforms_build_star_schema() {
        let mut tables = loaded();
        for step in TransformStep::ORDERED {
            transform(&mut tables, step).unwrap();
        }

        let customers = &tables[&Relation::DimCustomers].rows;
        assert_eq!(customers[0][0], Value::Int(1));
        assert_eq!(customers[1][0], Value::Int(2));

        let dates = &tables[&Relation::DimDate].rows;
        assert_eq!(dates.len(), 2);
        // 2024-03-02 is a Saturday, 2024-03-04 a Monday.
        assert_eq!(dates[0][0], Value::Int(20_240_302));
        assert_eq!(dates[0][6], Value::Bool(true));
        assert_eq!(dates[1][6], Value::Bool(false));
        assert_eq!(dates[0][5], Value::Int(1));

        let facts = &tables[&Relation::FactOrders].rows;
        assert_eq!(facts.len(), 2, "order for unknown customer is dropped");
        assert_eq!(facts[1][3], Value::Int(20_240_304));
    }

    #[test]
    fn test_bad_timestamp_fails_transform() {
        let mut tables = full_schema();
        let data = b"h\n1,A,B,a@b.c,not-a-date\n";
        load_csv(&mut tables, Relation::StgCustomers, data, 1).unwrap();
        let err = transform(&mut tables, TransformStep::DimCustomers).unwrap_err();
        assert!(err.to_string().contains("INSERT dim_customers"));
        assert!(tables[&Relation::DimCustomers].rows.is_empty());
    }

    #[test]
    fn test_export_orders_by_key_with_header() {
        let mut tables = full_schema();
        let data = b"h\n3,C,Cat,3.00,1\n1,A,Cat,1.00,1\n";
        load_csv(&mut tables, Relation::StgProducts, data, 1).unwrap();
        let (csv, rows) =
            export_csv(&tables, &ExportQuery::ordered(Relation::StgProducts), true).unwrap();
        assert_eq!(rows, 2);
        let text = String::from_utf8(csv).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "product_id,product_name,category,price,stock_quantity");
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("3,"));
    }

    #[test]
    fn test_unknown_relation() {
        let mut tables = Tables::new();
        let err = apply(&mut tables, &Statement::Clear(Relation::StgOrders)).unwrap_err();
        assert!(matches!(err, WarehouseError::UnknownRelation(_)));
        apply(&mut tables, &Statement::CreateTable(Relation::StgOrders)).unwrap();
        assert_eq!(apply(&mut tables, &Statement::Clear(Relation::StgOrders)).unwrap(), 0);
    }
}
