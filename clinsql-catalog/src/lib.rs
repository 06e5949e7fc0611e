//! CLINSQL Catalog - Schema Catalog
//!
//! Token-budgeted view of tables, columns, sample values, relationships,
//! and categories. Built once at startup by introspection (or reloaded from
//! the JSON cache) and read-mostly afterwards.

mod cache;
mod project;

pub use cache::catalog_fingerprint;
pub use project::DetailLevel;

use clinsql_core::{ClinsqlResult, ColumnInfo, ForeignKey, TableInfo};
use clinsql_db::DbClient;
use std::collections::HashMap;

/// Curated descriptions for the system/metadata tables so the generator
/// recognizes them as "ask the database about itself" sources.
fn metadata_description(table: &str) -> &'static str {
    match table {
        "_table_metadata" => {
            "System table containing metadata about all loaded tables including study \
             number, category, row count, and column list. Use this to query information \
             ABOUT the database structure."
        }
        "_studies" => {
            "Summary table of all clinical studies in the database. Contains study_number, \
             table_count, and total_rows for each study. USE THIS TABLE to answer questions \
             about how many studies exist or study-level statistics."
        }
        _ => "System metadata table",
    }
}

/// A column hit from `search_columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHit {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub category: String,
}

/// The schema catalog: table descriptors plus secondary indexes by category
/// and study identifier.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: HashMap<String, TableInfo>,
    by_category: HashMap<String, Vec<String>>,
    by_study: HashMap<String, Vec<String>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from pre-existing descriptors (cache load, tests).
    pub fn from_tables(tables: Vec<TableInfo>) -> Self {
        let mut catalog = Self::new();
        for table in tables {
            catalog.insert(table);
        }
        catalog
    }

    fn insert(&mut self, table: TableInfo) {
        if !table.category.is_empty() {
            self.by_category
                .entry(table.category.clone())
                .or_default()
                .push(table.name.clone());
        }
        if !table.study_number.is_empty() {
            self.by_study
                .entry(table.study_number.clone())
                .or_default()
                .push(table.name.clone());
        }
        self.tables.insert(table.name.clone(), table);
    }

    /// Rebuild the catalog from the database. Non-metadata tables get
    /// columns, deduplicated sample values, keys, and category/study tags;
    /// metadata tables get curated descriptions and no samples.
    pub async fn refresh(&mut self, db: &DbClient, include_samples: bool) -> ClinsqlResult<usize> {
        self.tables.clear();
        self.by_category.clear();
        self.by_study.clear();

        let table_names = db.list_tables().await?;
        for table_name in &table_names {
            let table = if table_name.starts_with('_') {
                Self::describe_metadata_table(db, table_name).await?
            } else {
                Self::describe_table(db, table_name, include_samples).await?
            };
            debug_assert!(table.foreign_keys_consistent());
            self.insert(table);
        }

        tracing::info!(tables = self.tables.len(), "schema catalog refreshed");
        Ok(self.tables.len())
    }

    async fn describe_table(
        db: &DbClient,
        table_name: &str,
        include_samples: bool,
    ) -> ClinsqlResult<TableInfo> {
        let column_meta = db.columns_of(table_name).await?;

        let mut samples: HashMap<String, Vec<String>> = HashMap::new();
        let mut category = String::new();
        let mut study_number = String::new();

        if include_samples {
            let sample_rows = db.sample_rows(table_name, 5).await.unwrap_or_default();
            if let Some(first) = sample_rows.first() {
                category = first
                    .get("_category")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                study_number = first
                    .get("_study_number")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
            }
            for meta in &column_meta {
                let mut seen = Vec::new();
                for row in &sample_rows {
                    if let Some(value) = row.get(&meta.name).and_then(|v| v.as_str()) {
                        if !value.is_empty() && !seen.contains(&value.to_string()) {
                            seen.push(value.to_string());
                        }
                    }
                    if seen.len() >= 3 {
                        break;
                    }
                }
                samples.insert(meta.name.clone(), seen);
            }
        }

        let columns = column_meta
            .into_iter()
            .map(|meta| {
                let mut column = ColumnInfo::new(&meta.name, &meta.data_type, meta.is_nullable);
                if let Some(values) = samples.remove(&meta.name) {
                    column.sample_values = values;
                }
                column
            })
            .collect();

        let foreign_keys = db
            .foreign_keys(table_name)
            .await?
            .into_iter()
            .map(|fk| ForeignKey {
                column: fk.column,
                references_table: fk.references_table,
                references_column: fk.references_column,
            })
            .collect();

        Ok(TableInfo {
            name: table_name.to_string(),
            columns,
            row_count: db.row_count(table_name).await?,
            primary_keys: db.primary_keys(table_name).await?,
            foreign_keys,
            category,
            study_number,
            description: String::new(),
        })
    }

    async fn describe_metadata_table(db: &DbClient, table_name: &str) -> ClinsqlResult<TableInfo> {
        let columns = db
            .columns_of(table_name)
            .await?
            .into_iter()
            .map(|meta| ColumnInfo::new(&meta.name, &meta.data_type, meta.is_nullable))
            .collect();

        Ok(TableInfo {
            name: table_name.to_string(),
            columns,
            row_count: db.row_count(table_name).await?,
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            category: "metadata".to_string(),
            study_number: String::new(),
            description: metadata_description(table_name).to_string(),
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// All table names, sorted for deterministic iteration.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    /// Tables carrying a category tag, sorted by name.
    pub fn tables_by_category(&self, category: &str) -> Vec<&TableInfo> {
        let mut hits: Vec<&TableInfo> = self
            .by_category
            .get(category)
            .map(|names| names.iter().filter_map(|n| self.tables.get(n)).collect())
            .unwrap_or_default();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits
    }

    /// Tables for one study, sorted by name.
    pub fn tables_by_study(&self, study_number: &str) -> Vec<&TableInfo> {
        let mut hits: Vec<&TableInfo> = self
            .by_study
            .get(study_number)
            .map(|names| names.iter().filter_map(|n| self.tables.get(n)).collect())
            .unwrap_or_default();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits
    }

    /// Case-insensitive substring search over column names.
    pub fn search_columns(&self, substring: &str) -> Vec<ColumnHit> {
        let needle = substring.to_lowercase();
        let mut hits = Vec::new();
        for name in self.table_names() {
            if let Some(table) = self.tables.get(&name) {
                for column in &table.columns {
                    if column.name.to_lowercase().contains(&needle) {
                        hits.push(ColumnHit {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            data_type: column.data_type.clone(),
                            category: table.category.clone(),
                        });
                    }
                }
            }
        }
        hits
    }

    /// Compact category-grouped summary of the whole catalog.
    pub fn schema_summary(&self) -> String {
        let mut lines = vec!["DATABASE SCHEMA SUMMARY:".to_string(), "=".repeat(50)];

        let mut categories: HashMap<&str, Vec<&TableInfo>> = HashMap::new();
        for table in self.tables.values() {
            let category = if table.category.is_empty() {
                "other"
            } else {
                table.category.as_str()
            };
            categories.entry(category).or_default().push(table);
        }

        let mut category_names: Vec<&str> = categories.keys().copied().collect();
        category_names.sort();

        for category in category_names {
            let mut tables = categories.remove(category).unwrap_or_default();
            tables.sort_by(|a, b| a.name.cmp(&b.name));
            lines.push(format!("\n[{}] - {} tables", category.to_uppercase(), tables.len()));
            for table in tables.iter().take(5) {
                let preview: Vec<&str> =
                    table.columns.iter().take(5).map(|c| c.name.as_str()).collect();
                let mut preview_text = preview.join(", ");
                if table.columns.len() > 5 {
                    preview_text.push_str(&format!(" ... (+{} more)", table.columns.len() - 5));
                }
                lines.push(format!("  - {}: {}", table.name, preview_text));
            }
            if tables.len() > 5 {
                lines.push(format!("  ... and {} more tables", tables.len() - 5));
            }
        }

        lines.join("\n")
    }

    /// Infer relationships between tables that share clinical link columns.
    pub fn infer_relationships(&self) -> Vec<(String, String, Vec<String>)> {
        const LINK_COLUMNS: [&str; 5] = [
            "subject_id",
            "site_id",
            "study_number",
            "patient_id",
            "visit_id",
        ];

        let names = self.table_names();
        let mut relationships = Vec::new();
        for (i, left) in names.iter().enumerate() {
            for right in names.iter().skip(i + 1) {
                let (Some(a), Some(b)) = (self.tables.get(left), self.tables.get(right)) else {
                    continue;
                };
                let shared: Vec<String> = LINK_COLUMNS
                    .iter()
                    .filter(|col| a.has_column(col) && b.has_column(col))
                    .map(|col| col.to_string())
                    .collect();
                if !shared.is_empty() {
                    relationships.push((left.clone(), right.clone(), shared));
                }
            }
        }
        relationships
    }
}
