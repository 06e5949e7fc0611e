//! Catalog introspection
//!
//! Read-only queries over `information_schema` and the pg catalogs. These
//! feed the schema catalog's refresh; nothing here is on the per-question
//! hot path.

use crate::{classify_pg_error, quote_ident, DbClient};
use clinsql_core::{ClinsqlError, ClinsqlResult};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio_postgres::SimpleQueryMessage;

/// One column as reported by information_schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// One foreign-key edge as reported by the constraint catalogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyMeta {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

impl DbClient {
    /// All table names in the public schema, sorted.
    pub async fn list_tables(&self) -> ClinsqlResult<Vec<String>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT table_name
                 FROM information_schema.tables
                 WHERE table_schema = 'public'
                 ORDER BY table_name",
                &[],
            )
            .await
            .map_err(|e| ClinsqlError::Db(classify_pg_error(&e, 0)))?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Column metadata for a table in ordinal order.
    pub async fn columns_of(&self, table: &str) -> ClinsqlResult<Vec<ColumnMeta>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT column_name, data_type, is_nullable
                 FROM information_schema.columns
                 WHERE table_schema = 'public' AND table_name = $1
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await
            .map_err(|e| ClinsqlError::Db(classify_pg_error(&e, 0)))?;
        Ok(rows
            .iter()
            .map(|r| ColumnMeta {
                name: r.get(0),
                data_type: r.get(1),
                is_nullable: r.get::<_, String>(2) == "YES",
            })
            .collect())
    }

    /// Up to `n` sample rows from a table, as JSON objects. Values come back
    /// through the text protocol, so every value is a JSON string.
    pub async fn sample_rows(&self, table: &str, n: usize) -> ClinsqlResult<Vec<JsonValue>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(table), n);
        let messages = conn
            .simple_query(&sql)
            .await
            .map_err(|e| ClinsqlError::Db(classify_pg_error(&e, 0)))?;

        let mut column_names: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        for message in &messages {
            if let SimpleQueryMessage::Row(row) = message {
                if column_names.is_empty() {
                    column_names = row
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect();
                }
                let mut object = JsonMap::with_capacity(column_names.len());
                for (i, name) in column_names.iter().enumerate() {
                    let value = row
                        .get(i)
                        .map(|v| JsonValue::String(v.to_string()))
                        .unwrap_or(JsonValue::Null);
                    object.insert(name.clone(), value);
                }
                rows.push(JsonValue::Object(object));
            }
        }
        Ok(rows)
    }

    /// Exact row count of a table.
    pub async fn row_count(&self, table: &str) -> ClinsqlResult<i64> {
        let conn = self.conn().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row = conn
            .query_one(&sql, &[])
            .await
            .map_err(|e| ClinsqlError::Db(classify_pg_error(&e, 0)))?;
        Ok(row.get(0))
    }

    /// Primary-key column names for a table.
    pub async fn primary_keys(&self, table: &str) -> ClinsqlResult<Vec<String>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT a.attname
                 FROM pg_index i
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 JOIN pg_class c ON c.oid = i.indrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE i.indisprimary
                   AND c.relname = $1
                   AND n.nspname = 'public'",
                &[&table],
            )
            .await
            .map_err(|e| ClinsqlError::Db(classify_pg_error(&e, 0)))?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Foreign-key edges declared on a table.
    pub async fn foreign_keys(&self, table: &str) -> ClinsqlResult<Vec<ForeignKeyMeta>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT kcu.column_name,
                        ccu.table_name AS foreign_table_name,
                        ccu.column_name AS foreign_column_name
                 FROM information_schema.table_constraints AS tc
                 JOIN information_schema.key_column_usage AS kcu
                   ON tc.constraint_name = kcu.constraint_name
                  AND tc.table_schema = kcu.table_schema
                 JOIN information_schema.constraint_column_usage AS ccu
                   ON ccu.constraint_name = tc.constraint_name
                  AND ccu.table_schema = tc.table_schema
                 WHERE tc.constraint_type = 'FOREIGN KEY'
                   AND tc.table_name = $1
                   AND tc.table_schema = 'public'",
                &[&table],
            )
            .await
            .map_err(|e| ClinsqlError::Db(classify_pg_error(&e, 0)))?;
        Ok(rows
            .iter()
            .map(|r| ForeignKeyMeta {
                column: r.get(0),
                references_table: r.get(1),
                references_column: r.get(2),
            })
            .collect())
    }

    /// Distinct non-empty values of one text column, capped. Used by the
    /// preprocessor's value indexer.
    pub async fn distinct_values(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> ClinsqlResult<Vec<String>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL AND {col} != '' LIMIT {limit}",
            col = quote_ident(column),
            table = quote_ident(table),
            limit = limit,
        );
        let messages = conn
            .simple_query(&sql)
            .await
            .map_err(|e| ClinsqlError::Db(classify_pg_error(&e, 0)))?;

        let mut values = Vec::new();
        for message in &messages {
            if let SimpleQueryMessage::Row(row) = message {
                if let Some(value) = row.get(0) {
                    values.push(value.to_string());
                }
            }
        }
        Ok(values)
    }
}
