//! Destination schema resolution
//!
//! Column introspection for the destination table, plus the auto-DDL used
//! when an import targets a table (or columns) that do not exist yet.
//! Every identifier that reaches these statements has already passed the
//! validator's identifier rules.

use tokio_postgres::Client;

use crate::db::types::DataType;
use crate::error::{DbError, DbResult};

/// A resolved destination column
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
}

/// The destination table with its resolved column set
#[derive(Debug, Clone)]
pub struct Destination {
    /// Table name (unqualified; resolved in the session's current schema)
    pub table: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
}

impl Destination {
    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether the destination carries the given column
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Double-quote a pre-validated identifier.
///
/// Callers must have run the identifier through the validator first; the
/// allowed character set cannot contain quotes or whitespace.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Check whether the table exists in the current schema
pub async fn table_exists(client: &Client, table: &str) -> DbResult<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS ( \
               SELECT 1 FROM pg_class c \
               JOIN pg_namespace n ON n.oid = c.relnamespace \
               WHERE n.nspname = current_schema() \
                 AND c.relname = $1 \
                 AND c.relkind = 'r')",
            &[&table],
        )
        .await
        .map_err(|e| DbError::SchemaLoadFailed(e.to_string()))?;
    Ok(row.get(0))
}

/// Load the destination's columns in ordinal order
pub async fn load_columns(client: &Client, table: &str) -> DbResult<Vec<ColumnInfo>> {
    let rows = client
        .query(
            "SELECT a.attname, format_type(a.atttypid, a.atttypmod) \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = current_schema() \
               AND c.relname = $1 \
               AND c.relkind = 'r' \
               AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            &[&table],
        )
        .await
        .map_err(|e| DbError::SchemaLoadFailed(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row| {
            let name: String = row.get(0);
            let type_name: String = row.get(1);
            ColumnInfo {
                name,
                data_type: DataType::from_sql_name(&type_name),
            }
        })
        .collect())
}

/// Cheap emptiness probe for the strategy selector
pub async fn table_is_empty(client: &Client, table: &str) -> DbResult<bool> {
    let sql = format!(
        "SELECT NOT EXISTS (SELECT 1 FROM {} LIMIT 1)",
        quote_ident(table)
    );
    let row = client
        .query_one(sql.as_str(), &[])
        .await
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;
    Ok(row.get(0))
}

/// Create the destination table with audit columns and inferred data columns
pub async fn create_table(client: &Client, table: &str, data_columns: &[String]) -> DbResult<()> {
    let mut defs = vec![
        "id UUID PRIMARY KEY DEFAULT gen_random_uuid()".to_string(),
        "created_at TIMESTAMPTZ DEFAULT now()".to_string(),
        "updated_at TIMESTAMPTZ DEFAULT now()".to_string(),
    ];
    for col in data_columns {
        if col.eq_ignore_ascii_case("id")
            || col.eq_ignore_ascii_case("created_at")
            || col.eq_ignore_ascii_case("updated_at")
        {
            continue;
        }
        defs.push(format!("{} {}", quote_ident(col), infer_column_type(col)));
    }

    let sql = format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "));
    client
        .execute(sql.as_str(), &[])
        .await
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;
    Ok(())
}

/// Add a missing column to an existing destination
pub async fn add_column(client: &Client, table: &str, column: &str) -> DbResult<()> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(column),
        infer_column_type(column)
    );
    client
        .execute(sql.as_str(), &[])
        .await
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;
    Ok(())
}

/// Pick a column type from name keywords.
///
/// Heuristic carried over from the upstream importer: money-ish names get
/// NUMERIC, count-ish names BIGINT, time-ish names TIMESTAMPTZ, contact
/// fields a bounded VARCHAR, everything else TEXT.
pub fn infer_column_type(column_name: &str) -> &'static str {
    let lower = column_name.to_ascii_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if contains_any(&["price", "cost", "amount", "total"]) {
        "NUMERIC"
    } else if contains_any(&["stock", "quantity", "count", "number"]) {
        "BIGINT"
    } else if contains_any(&["date", "time", "created", "updated"]) {
        "TIMESTAMPTZ"
    } else if contains_any(&["email", "url", "phone"]) {
        "VARCHAR(255)"
    } else {
        "TEXT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_column_type_keywords() {
        assert_eq!(infer_column_type("unit_price"), "NUMERIC");
        assert_eq!(infer_column_type("total"), "NUMERIC");
        assert_eq!(infer_column_type("stock_level"), "BIGINT");
        assert_eq!(infer_column_type("order_date"), "TIMESTAMPTZ");
        assert_eq!(infer_column_type("contact_email"), "VARCHAR(255)");
        assert_eq!(infer_column_type("description"), "TEXT");
    }

    #[test]
    fn test_infer_column_type_case_insensitive() {
        assert_eq!(infer_column_type("UnitPrice"), "NUMERIC");
        assert_eq!(infer_column_type("CREATED_AT"), "TIMESTAMPTZ");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("products"), "\"products\"");
    }

    #[test]
    fn test_destination_column_lookup() {
        let dest = Destination {
            table: "products".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: DataType::Uuid,
                },
                ColumnInfo {
                    name: "name".to_string(),
                    data_type: DataType::Text,
                },
            ],
        };
        assert!(dest.has_column("id"));
        assert!(!dest.has_column("missing"));
        assert_eq!(dest.column("name").unwrap().data_type, DataType::Text);
    }
}
