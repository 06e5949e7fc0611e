//! Validation and safe execution
//!
//! `validate` runs EXPLAIN inside a rolled-back read-only transaction so
//! nothing is ever executed. `safe_execute` enforces a statement timeout and
//! a row cap, and converts rows to JSON using the prepared statement's
//! column types to interpret the text-protocol values.

use crate::{classify_pg_error, DbClient};
use clinsql_core::{ClinsqlError, ClinsqlResult, DbError, ExecutionOutcome};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use tokio_postgres::types::Type;
use tokio_postgres::SimpleQueryMessage;
use tokio_util::sync::CancellationToken;

static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").expect("static regex"));

/// Result of an EXPLAIN-based syntax/plan check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub error: Option<String>,
}

/// Whether the statement already carries a LIMIT clause.
pub fn has_limit(sql: &str) -> bool {
    LIMIT_RE.is_match(sql)
}

/// Wrap an uncapped SELECT so it can never return more than `row_cap` rows.
/// Statements that already limit themselves, and non-SELECT statements, are
/// returned unchanged.
pub fn wrap_with_row_cap(sql: &str, row_cap: usize) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let upper = trimmed.to_ascii_uppercase();
    let is_query = upper.starts_with("SELECT") || upper.starts_with("WITH");
    if !is_query || has_limit(trimmed) {
        return trimmed.to_string();
    }
    format!("SELECT * FROM ({}) AS q LIMIT {}", trimmed, row_cap)
}

impl DbClient {
    /// Validate SQL via `EXPLAIN` in a read-only transaction that is always
    /// rolled back. Returns the plan error without executing anything.
    pub async fn validate(&self, sql: &str) -> ClinsqlResult<Validation> {
        let conn = self.conn().await?;

        if let Err(e) = conn.batch_execute("BEGIN READ ONLY").await {
            return Err(ClinsqlError::Db(classify_pg_error(&e, 0)));
        }

        let explain = format!("EXPLAIN {}", sql.trim().trim_end_matches(';'));
        let result = conn.batch_execute(&explain).await;

        // Roll back regardless of outcome; a failed EXPLAIN leaves the
        // transaction aborted.
        let _ = conn.batch_execute("ROLLBACK").await;

        match result {
            Ok(()) => Ok(Validation {
                valid: true,
                error: None,
            }),
            Err(e) => {
                let classified = classify_pg_error(&e, 0);
                Ok(Validation {
                    valid: false,
                    error: Some(classified.to_string()),
                })
            }
        }
    }

    /// Execute a statement with a session-level timeout and a hard row cap.
    ///
    /// Failure kinds are distinguished in the outcome's error string via
    /// `DbError`; a timed-out or cancelled connection is discarded from the
    /// pool rather than recycled.
    pub async fn safe_execute(
        &self,
        sql: &str,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> ClinsqlResult<ExecutionOutcome> {
        let conn = self.conn().await?;
        let wrapped = wrap_with_row_cap(sql, self.row_cap());

        let set_timeout = format!("SET statement_timeout = '{}'", timeout_secs * 1000);
        if let Err(e) = conn.batch_execute(&set_timeout).await {
            return Ok(ExecutionOutcome::failure(
                classify_pg_error(&e, timeout_secs).to_string(),
            ));
        }

        // Prepare first: catches syntax errors and yields column types for
        // interpreting the text-protocol values below.
        let prepared = tokio::select! {
            prepared = conn.prepare(&wrapped) => Some(prepared),
            _ = cancel.cancelled() => None,
        };
        let statement = match prepared {
            Some(Ok(statement)) => statement,
            Some(Err(e)) => {
                let _ = conn.batch_execute("RESET statement_timeout").await;
                return Ok(ExecutionOutcome::failure(
                    classify_pg_error(&e, timeout_secs).to_string(),
                ));
            }
            None => {
                // Cancelled mid-prepare; do not recycle this connection.
                deadpool_postgres::Object::take(conn);
                return Ok(ExecutionOutcome::failure(
                    DbError::Runtime {
                        message: "cancelled".to_string(),
                    }
                    .to_string(),
                ));
            }
        };

        let columns: Vec<(String, Type)> = statement
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.type_().clone()))
            .collect();

        let executed = tokio::select! {
            result = conn.simple_query(&wrapped) => Some(result),
            _ = cancel.cancelled() => None,
        };
        let messages = match executed {
            Some(Ok(messages)) => messages,
            Some(Err(e)) => {
                let classified = classify_pg_error(&e, timeout_secs);
                if matches!(classified, DbError::Timeout { .. }) {
                    // The statement was aborted mid-flight; do not recycle
                    // this connection.
                    tracing::warn!(timeout_secs, "statement timed out, discarding connection");
                    deadpool_postgres::Object::take(conn);
                } else {
                    let _ = conn.batch_execute("RESET statement_timeout").await;
                }
                return Ok(ExecutionOutcome::failure(classified.to_string()));
            }
            None => {
                deadpool_postgres::Object::take(conn);
                return Ok(ExecutionOutcome::failure(
                    DbError::Runtime {
                        message: "cancelled".to_string(),
                    }
                    .to_string(),
                ));
            }
        };

        let _ = conn.batch_execute("RESET statement_timeout").await;

        let mut rows = Vec::new();
        for message in &messages {
            if let SimpleQueryMessage::Row(row) = message {
                let mut object = serde_json::Map::with_capacity(columns.len());
                for (i, (name, ty)) in columns.iter().enumerate() {
                    let value = row.get(i).map(|v| text_to_json(v, ty));
                    object.insert(name.clone(), value.unwrap_or(JsonValue::Null));
                }
                rows.push(JsonValue::Object(object));
            }
        }

        let row_count = rows.len();
        Ok(ExecutionOutcome {
            success: true,
            columns: columns.into_iter().map(|(name, _)| name).collect(),
            data: rows,
            row_count,
            error: None,
        })
    }
}

/// Interpret a text-protocol value using the column's declared type.
pub(crate) fn text_to_json(text: &str, ty: &Type) -> JsonValue {
    if *ty == Type::BOOL {
        json!(text == "t")
    } else if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        text.parse::<i64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(text))
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 || *ty == Type::NUMERIC {
        text.parse::<f64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| json!(text))
    } else {
        json!(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_limit_is_case_insensitive() {
        assert!(has_limit("SELECT * FROM sites LIMIT 10"));
        assert!(has_limit("select * from sites limit 5"));
        assert!(!has_limit("SELECT unlimited_column FROM sites"));
    }

    #[test]
    fn test_wrap_adds_cap_to_uncapped_select() {
        let wrapped = wrap_with_row_cap("SELECT * FROM subjects;", 1000);
        assert_eq!(wrapped, "SELECT * FROM (SELECT * FROM subjects) AS q LIMIT 1000");
    }

    #[test]
    fn test_wrap_leaves_capped_select_alone() {
        let sql = "SELECT * FROM subjects LIMIT 20";
        assert_eq!(wrap_with_row_cap(sql, 1000), sql);
    }

    #[test]
    fn test_wrap_handles_cte_queries() {
        let wrapped = wrap_with_row_cap("WITH q AS (SELECT 1 AS n) SELECT n FROM q", 50);
        assert!(wrapped.starts_with("SELECT * FROM (WITH q AS"));
        assert!(wrapped.ends_with("LIMIT 50"));
    }

    #[test]
    fn test_wrap_leaves_non_select_alone() {
        let sql = "EXPLAIN SELECT 1";
        assert_eq!(wrap_with_row_cap(sql, 10), sql);
    }

    #[test]
    fn test_text_to_json_type_interpretation() {
        assert_eq!(text_to_json("t", &Type::BOOL), json!(true));
        assert_eq!(text_to_json("f", &Type::BOOL), json!(false));
        assert_eq!(text_to_json("42", &Type::INT8), json!(42));
        assert_eq!(text_to_json("12.5", &Type::NUMERIC), json!(12.5));
        assert_eq!(text_to_json("JPN", &Type::TEXT), json!("JPN"));
        // Unparseable numerics fall back to the raw text.
        assert_eq!(text_to_json("NaN-ish", &Type::NUMERIC), json!("NaN-ish"));
    }
}
