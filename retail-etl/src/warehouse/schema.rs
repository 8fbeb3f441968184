//! DDL for the retail star schema.

use super::Statement;
use crate::core::Relation;

/// Renders `CREATE TABLE IF NOT EXISTS` for a relation.
#[must_use]
pub fn create_table_sql(relation: Relation) -> String {
    let columns = relation
        .columns()
        .iter()
        .map(|c| {
            if c.identity {
                format!("    {} {} IDENTITY(1,1)", c.name, c.ty.sql())
            } else {
                format!("    {} {}", c.name, c.ty.sql())
            }
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE IF NOT EXISTS {relation} (\n{columns}\n);")
}

/// Statements creating every relation the pipeline uses.
#[must_use]
pub fn bootstrap() -> Vec<Statement> {
    Relation::ALL.into_iter().map(Statement::CreateTable).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_column_ddl() {
        let sql = create_table_sql(Relation::DimCustomers);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS dim_customers ("));
        assert!(sql.contains("customer_key BIGINT IDENTITY(1,1)"));
        assert!(sql.contains("registration_date TIMESTAMP"));
    }

    #[test]
    fn test_bootstrap_covers_all_relations() {
        let statements = bootstrap();
        assert_eq!(statements.len(), Relation::ALL.len());
        assert_eq!(statements[0].label(), "CREATE stg_customers");
    }
}
