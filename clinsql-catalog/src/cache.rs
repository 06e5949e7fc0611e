//! JSON schema cache
//!
//! The catalog persists to a JSON file keyed by a fingerprint of table
//! names and row counts. On boot the cache is accepted only when the
//! fingerprint still matches the live database.

use crate::SchemaCatalog;
use clinsql_core::{CatalogError, ClinsqlError, ClinsqlResult, TableInfo};
use clinsql_db::DbClient;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    fingerprint: String,
    generated_at: chrono::DateTime<chrono::Utc>,
    tables: Vec<TableInfo>,
}

/// Fingerprint of the live database: SHA-256 over sorted
/// `table_name:row_count` pairs.
pub async fn catalog_fingerprint(db: &DbClient) -> ClinsqlResult<String> {
    let mut entries = Vec::new();
    for table in db.list_tables().await? {
        let rows = db.row_count(&table).await?;
        entries.push(format!("{}:{}", table, rows));
    }
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

impl SchemaCatalog {
    /// Write the catalog to the JSON cache under the given fingerprint.
    pub fn save_cache(&self, path: &Path, fingerprint: &str) -> ClinsqlResult<()> {
        let mut tables: Vec<TableInfo> = self.tables().cloned().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));

        let file = CacheFile {
            fingerprint: fingerprint.to_string(),
            generated_at: chrono::Utc::now(),
            tables,
        };
        let encoded = serde_json::to_string_pretty(&file).map_err(|e| {
            ClinsqlError::Catalog(CatalogError::Cache {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClinsqlError::Catalog(CatalogError::Cache {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            })?;
        }
        std::fs::write(path, encoded).map_err(|e| {
            ClinsqlError::Catalog(CatalogError::Cache {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Load the catalog from the JSON cache, accepting it only when the
    /// stored fingerprint matches. Returns `None` when the cache is absent
    /// or stale; corrupt files are treated as stale, not fatal.
    pub fn load_cache(path: &Path, expected_fingerprint: &str) -> Option<SchemaCatalog> {
        let raw = std::fs::read_to_string(path).ok()?;
        let file: CacheFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt schema cache");
                return None;
            }
        };
        if file.fingerprint != expected_fingerprint {
            tracing::info!(path = %path.display(), "schema cache is stale, rebuilding");
            return None;
        }
        Some(SchemaCatalog::from_tables(file.tables))
    }

    /// Load the catalog from cache or rebuild it by introspection. The
    /// freshly built catalog is persisted before returning.
    pub async fn load_or_refresh(
        db: &DbClient,
        cache_path: &Path,
        include_samples: bool,
    ) -> ClinsqlResult<SchemaCatalog> {
        let fingerprint = catalog_fingerprint(db).await?;

        if let Some(catalog) = Self::load_cache(cache_path, &fingerprint) {
            tracing::info!(tables = catalog.len(), "schema catalog loaded from cache");
            return Ok(catalog);
        }

        let mut catalog = SchemaCatalog::new();
        catalog.refresh(db, include_samples).await?;
        catalog.save_cache(cache_path, &fingerprint)?;
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::make_test_catalog;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("clinsql-catalog-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_cache_round_trip_preserves_tables() {
        let catalog = make_test_catalog();
        let path = temp_path("roundtrip.json");

        catalog.save_cache(&path, "fp-1").unwrap();
        let loaded = SchemaCatalog::load_cache(&path, "fp-1").unwrap();

        assert_eq!(loaded.len(), catalog.len());
        let subjects = loaded.table("subjects").unwrap();
        assert_eq!(subjects.row_count, 240);
        assert_eq!(subjects.foreign_keys.len(), 1);
        // Secondary indexes are rebuilt on load.
        assert_eq!(loaded.tables_by_category("query").len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_stale_fingerprint_rejects_cache() {
        let catalog = make_test_catalog();
        let path = temp_path("stale.json");

        catalog.save_cache(&path, "fp-old").unwrap();
        assert!(SchemaCatalog::load_cache(&path, "fp-new").is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_cache_is_treated_as_stale() {
        let path = temp_path("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SchemaCatalog::load_cache(&path, "fp").is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_cache_returns_none() {
        let path = temp_path("does-not-exist.json");
        assert!(SchemaCatalog::load_cache(&path, "fp").is_none());
    }
}
