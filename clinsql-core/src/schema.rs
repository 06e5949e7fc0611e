//! Schema descriptor types
//!
//! Owned exclusively by the catalog. Foreign-key edges reference tables and
//! columns by name so the descriptor graph stays acyclic at the object level.

use serde::{Deserialize, Serialize};

// ============================================================================
// SEMANTIC TYPES
// ============================================================================

/// Coarse semantic type of a column, derived from the Postgres data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Text,
    Integer,
    Numeric,
    Temporal,
    Boolean,
    Unknown,
}

impl SemanticType {
    /// Map an `information_schema.columns.data_type` string to a semantic type.
    pub fn from_pg_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "text" | "character varying" | "varchar" | "char" | "character" | "citext" => {
                Self::Text
            }
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "serial"
            | "bigserial" => Self::Integer,
            "numeric" | "decimal" | "real" | "double precision" | "float4" | "float8"
            | "money" => Self::Numeric,
            "date" | "time" | "timestamp" | "timestamp without time zone"
            | "timestamp with time zone" | "timestamptz" | "interval" => Self::Temporal,
            "boolean" | "bool" => Self::Boolean,
            _ => Self::Unknown,
        }
    }

    /// Whether values of this type are eligible for the LSH value index.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text)
    }
}

// ============================================================================
// COLUMN DESCRIPTOR
// ============================================================================

/// Information about a database column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Raw Postgres data type as reported by information_schema.
    pub data_type: String,
    pub semantic_type: SemanticType,
    pub is_nullable: bool,
    /// Up to three deduplicated sample values.
    #[serde(default)]
    pub sample_values: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_nullable: bool) -> Self {
        let data_type = data_type.into();
        let semantic_type = SemanticType::from_pg_type(&data_type);
        Self {
            name: name.into(),
            data_type,
            semantic_type,
            is_nullable,
            sample_values: Vec::new(),
            description: String::new(),
        }
    }

    /// Compact single-line representation for token-tight contexts.
    pub fn to_compact_str(&self) -> String {
        let nullable = if self.is_nullable { "NULL" } else { "NOT NULL" };
        format!("{} ({}, {})", self.name, self.data_type, nullable)
    }

    /// Detailed representation with a sample-value hint.
    pub fn to_detailed_str(&self) -> String {
        let mut base = self.to_compact_str();
        if !self.sample_values.is_empty() {
            let samples: Vec<String> = self
                .sample_values
                .iter()
                .take(3)
                .map(|v| v.chars().take(30).collect())
                .collect();
            base.push_str(&format!(" -- e.g., {}", samples.join(", ")));
        }
        base
    }
}

// ============================================================================
// TABLE DESCRIPTOR
// ============================================================================

/// A foreign-key edge, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Column in the owning table. Must be a member of that table.
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Information about a database table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Free-form category tag (e.g. `visit`, `query`, `safety`, `coding`).
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub study_number: String,
    #[serde(default)]
    pub description: String,
}

impl TableInfo {
    /// System/metadata tables carry a leading underscore and are never
    /// value-indexed.
    pub fn is_metadata(&self) -> bool {
        self.name.starts_with('_')
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// DDL-like rendering of this table.
    pub fn to_ddl(&self, include_samples: bool) -> String {
        let mut lines = Vec::with_capacity(self.columns.len() + 4);
        if !self.description.is_empty() {
            lines.push(format!("-- {}", self.description));
        }
        lines.push(format!("CREATE TABLE {} (", self.name));

        for col in &self.columns {
            let rendered = if include_samples {
                col.to_detailed_str()
            } else {
                col.to_compact_str()
            };
            lines.push(format!("    {},", rendered));
        }

        if !self.primary_keys.is_empty() {
            lines.push(format!("    PRIMARY KEY ({})", self.primary_keys.join(", ")));
        } else if let Some(last) = lines.last_mut() {
            // Strip the trailing comma from the final column line.
            if let Some(stripped) = last.strip_suffix(',') {
                *last = stripped.to_string();
            }
        }

        lines.push(");".to_string());

        if self.row_count > 0 {
            lines.push(format!("-- {} rows", self.row_count));
        }

        lines.join("\n")
    }

    /// Very compact one-line rendering: `name[col:type,…]`.
    pub fn to_compact(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let ty: String = c.data_type.chars().take(10).collect();
                format!("{}:{}", c.name, ty)
            })
            .collect();
        format!("{}[{}]", self.name, cols.join(", "))
    }

    /// Check that every foreign-key source column exists in this table.
    pub fn foreign_keys_consistent(&self) -> bool {
        self.foreign_keys.iter().all(|fk| self.has_column(&fk.column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_table() -> TableInfo {
        TableInfo {
            name: "subjects".to_string(),
            columns: vec![
                ColumnInfo::new("subject_id", "integer", false),
                ColumnInfo::new("status", "text", true),
                ColumnInfo::new("site_id", "integer", true),
            ],
            row_count: 240,
            primary_keys: vec!["subject_id".to_string()],
            foreign_keys: vec![ForeignKey {
                column: "site_id".to_string(),
                references_table: "sites".to_string(),
                references_column: "site_id".to_string(),
            }],
            category: "enrollment".to_string(),
            study_number: "10".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_semantic_type_mapping() {
        assert_eq!(SemanticType::from_pg_type("character varying"), SemanticType::Text);
        assert_eq!(SemanticType::from_pg_type("BIGINT"), SemanticType::Integer);
        assert_eq!(SemanticType::from_pg_type("double precision"), SemanticType::Numeric);
        assert_eq!(
            SemanticType::from_pg_type("timestamp with time zone"),
            SemanticType::Temporal
        );
        assert_eq!(SemanticType::from_pg_type("bytea"), SemanticType::Unknown);
    }

    #[test]
    fn test_ddl_rendering_includes_pk_and_row_count() {
        let table = make_test_table();
        let ddl = table.to_ddl(false);
        assert!(ddl.contains("CREATE TABLE subjects ("));
        assert!(ddl.contains("PRIMARY KEY (subject_id)"));
        assert!(ddl.ends_with("-- 240 rows"));
    }

    #[test]
    fn test_ddl_without_pk_strips_trailing_comma() {
        let mut table = make_test_table();
        table.primary_keys.clear();
        let ddl = table.to_ddl(false);
        assert!(ddl.contains("site_id (integer, NULL)\n);"));
    }

    #[test]
    fn test_compact_rendering() {
        let table = make_test_table();
        let compact = table.to_compact();
        assert!(compact.starts_with("subjects["));
        assert!(compact.contains("status:text"));
    }

    #[test]
    fn test_foreign_key_consistency() {
        let mut table = make_test_table();
        assert!(table.foreign_keys_consistent());
        table.foreign_keys.push(ForeignKey {
            column: "missing_col".to_string(),
            references_table: "sites".to_string(),
            references_column: "site_id".to_string(),
        });
        assert!(!table.foreign_keys_consistent());
    }

    #[test]
    fn test_metadata_detection() {
        let mut table = make_test_table();
        assert!(!table.is_metadata());
        table.name = "_studies".to_string();
        assert!(table.is_metadata());
    }

    #[test]
    fn test_detailed_str_truncates_samples() {
        let mut col = ColumnInfo::new("country", "text", true);
        col.sample_values = vec!["a-very-long-country-name-that-keeps-going".to_string()];
        let s = col.to_detailed_str();
        assert!(s.contains("e.g., a-very-long-country-name-that-k"));
    }
}
