//! Token-budgeted schema projection
//!
//! Renders a subset of the catalog into the DDL-like string consumed by the
//! SQL generator. The projector is deterministic: identical inputs and
//! budget yield byte-identical output.

use crate::SchemaCatalog;
use clinsql_core::{estimate_tokens, TableInfo};

/// Detail level for projected table blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    /// Single line `name[col:type,…]`.
    Compact,
    /// DDL without sample values.
    Medium,
    /// DDL with sample-value hints.
    Detailed,
}

fn render_table(table: &TableInfo, detail: DetailLevel) -> String {
    let mut block = match detail {
        DetailLevel::Detailed => table.to_ddl(true),
        DetailLevel::Medium => table.to_ddl(false),
        DetailLevel::Compact => table.to_compact(),
    };
    if detail != DetailLevel::Compact && !table.foreign_keys.is_empty() {
        for fk in &table.foreign_keys {
            block.push_str(&format!(
                "\n-- JOIN: {}.{} = {}.{}",
                table.name, fk.column, fk.references_table, fk.references_column
            ));
        }
    }
    block
}

impl SchemaCatalog {
    /// Project the selected tables into a token-budgeted schema string.
    ///
    /// Tables are emitted greedily in the requested order. A table whose
    /// full block would overflow the budget is downgraded to compact; when
    /// even the compact line does not fit, a truncation notice is emitted
    /// and projection stops. Unknown table names are skipped.
    pub fn project(&self, selected: &[String], token_budget: i32, detail: DetailLevel) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut used = 0i32;

        let header = "-- DATABASE SCHEMA --\n";
        parts.push(header.to_string());
        used += estimate_tokens(header);

        let known: Vec<&TableInfo> = selected
            .iter()
            .filter_map(|name| self.table(name))
            .collect();
        let total = known.len();

        for (emitted, table) in known.iter().enumerate() {
            let block = render_table(table, detail);
            let block_tokens = estimate_tokens(&block);

            if used + block_tokens > token_budget {
                let compact = table.to_compact();
                let compact_tokens = estimate_tokens(&compact);
                if used + compact_tokens <= token_budget {
                    parts.push(compact);
                    used += compact_tokens;
                } else {
                    parts.push(format!(
                        "\n-- Schema truncated. {} tables omitted --",
                        total - emitted
                    ));
                    break;
                }
            } else {
                parts.push(block);
                used += block_tokens;
            }
        }

        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::make_test_catalog;

    #[test]
    fn test_projection_emits_tables_in_requested_order() {
        let catalog = make_test_catalog();
        let projected = catalog.project(
            &["sites".to_string(), "subjects".to_string()],
            100_000,
            DetailLevel::Medium,
        );
        let sites_at = projected.find("CREATE TABLE sites").unwrap();
        let subjects_at = projected.find("CREATE TABLE subjects").unwrap();
        assert!(sites_at < subjects_at);
    }

    #[test]
    fn test_projection_appends_join_lines() {
        let catalog = make_test_catalog();
        let projected = catalog.project(&["subjects".to_string()], 100_000, DetailLevel::Medium);
        assert!(projected.contains("-- JOIN: subjects.site_id = sites.site_id"));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let catalog = make_test_catalog();
        let selected = vec!["data_queries".to_string(), "sites".to_string()];
        let a = catalog.project(&selected, 500, DetailLevel::Detailed);
        let b = catalog.project(&selected, 500, DetailLevel::Detailed);
        assert_eq!(a, b);
    }

    #[test]
    fn test_projection_downgrades_then_truncates_under_pressure() {
        let catalog = make_test_catalog();
        let selected = vec![
            "subjects".to_string(),
            "sites".to_string(),
            "data_queries".to_string(),
        ];
        // Enough for the header and roughly one compact line.
        let projected = catalog.project(&selected, 60, DetailLevel::Detailed);
        assert!(
            projected.contains("subjects[") || projected.contains("-- Schema truncated."),
            "tight budget must compact or truncate: {projected}"
        );
        // A generous budget renders every block in full.
        let full = catalog.project(&selected, 100_000, DetailLevel::Detailed);
        assert!(full.contains("CREATE TABLE data_queries"));
        assert!(!full.contains("-- Schema truncated."));
    }

    #[test]
    fn test_projection_skips_unknown_tables() {
        let catalog = make_test_catalog();
        let projected = catalog.project(
            &["no_such_table".to_string(), "sites".to_string()],
            100_000,
            DetailLevel::Medium,
        );
        assert!(projected.contains("CREATE TABLE sites"));
        assert!(!projected.contains("no_such_table"));
    }

    #[test]
    fn test_compact_projection_is_single_lines() {
        let catalog = make_test_catalog();
        let projected = catalog.project(&["sites".to_string()], 100_000, DetailLevel::Compact);
        assert!(projected.contains("sites[site_id:integer"));
        assert!(!projected.contains("CREATE TABLE"));
    }
}
