//! Question-analysis and schema-linking types
//!
//! Produced by the Information Retriever and Schema Selector stages; the
//! Candidate Generator only ever sees the rendered `schema_context` string.

use serde::{Deserialize, Serialize};

// ============================================================================
// PARSED KEYWORDS
// ============================================================================

/// Keyword bundle extracted from the question, produced once per question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParsedKeywords {
    /// Generic keywords for entity lookup.
    pub keywords: Vec<String>,
    /// Candidate entity literals (e.g. `Site 18`, `Study 10`).
    pub entities: Vec<String>,
    /// Clinical vocabulary terms (e.g. `sae`, `open query`).
    pub clinical_terms: Vec<String>,
    /// Filter hints (e.g. `more than 45 days`).
    pub filters: Vec<String>,
}

impl ParsedKeywords {
    /// Deterministic fallback: whitespace tokenization of the question,
    /// lowercased, punctuation-trimmed, stopword-light.
    pub fn from_whitespace(question: &str) -> Self {
        let keywords: Vec<String> = question
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| w.len() >= 2)
            .collect();
        Self {
            keywords,
            ..Default::default()
        }
    }
}

/// One LSH hit for a keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub value: String,
    pub table: String,
    pub column: String,
    pub score: f64,
}

// ============================================================================
// LINKED SCHEMA
// ============================================================================

/// Role a selected table plays in the projected query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableRole {
    Primary,
    Join,
    Filter,
}

/// Clause a selected column is intended for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnRole {
    Select,
    Where,
    Join,
    GroupBy,
}

/// A table chosen by the Schema Selector with its column subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTable {
    pub table: String,
    pub role: TableRole,
    #[serde(default)]
    pub reason: String,
    /// Chosen columns with their intended clause. Empty means all columns.
    #[serde(default)]
    pub columns: Vec<(String, ColumnRole)>,
}

/// Ordered selection of tables plus join hints, rendered to the
/// token-budgeted `schema_context` consumed by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LinkedSchema {
    pub selected_tables: Vec<SelectedTable>,
    /// Join hints of the form `t1.c1 = t2.c2`.
    pub join_hints: Vec<String>,
    pub schema_context: String,
    pub primary_table: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_fallback_trims_punctuation() {
        let parsed = ParsedKeywords::from_whitespace("How many patients are in Japan?");
        assert!(parsed.keywords.contains(&"japan".to_string()));
        assert!(parsed.keywords.contains(&"patients".to_string()));
        assert!(!parsed.keywords.iter().any(|k| k.contains('?')));
    }

    #[test]
    fn test_whitespace_fallback_drops_single_chars() {
        let parsed = ParsedKeywords::from_whitespace("a query on x");
        assert_eq!(parsed.keywords, vec!["query", "on"]);
    }

    #[test]
    fn test_column_role_serde_uses_clause_names() {
        let s = serde_json::to_string(&ColumnRole::GroupBy).unwrap();
        assert_eq!(s, "\"GROUP_BY\"");
    }
}
