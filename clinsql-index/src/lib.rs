//! CLINSQL Index - Preprocessor
//!
//! Builds two indexes from the schema catalog:
//! - a MinHash-LSH index over distinct values of text columns, for entity
//!   retrieval (`Site 18` -> `sites.site_number`)
//! - a vector index over table/column descriptions, for context retrieval
//!
//! Both are built once at startup (or loaded from the on-disk blob) and are
//! immutable afterwards, so concurrent reads need no locking.

mod descriptions;
mod embed;
mod minhash;

pub use descriptions::{readable_name, ContextHit, DescriptionIndex, DocKind, SchemaDoc};
pub use embed::{cosine_similarity, EmbeddingBackend, FeatureEmbedder};
#[cfg(feature = "fastembed")]
pub use embed::SentenceEmbedder;
pub use minhash::{
    edit_distance, edit_distance_similarity, jaccard_similarity, shingles, IndexedValue,
    MinHashLsh,
};

use clinsql_core::{ClinsqlResult, EntityMatch, IndexError, SemanticType};
use clinsql_catalog::SchemaCatalog;
use clinsql_db::DbClient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Magic prefix of the cache blob.
const CACHE_MAGIC: &[u8] = b"CLINSQL-IDX";
const CACHE_VERSION: u8 = 1;

/// Values are retained only inside this length window.
const MIN_VALUE_LEN: usize = 2;
const MAX_VALUE_LEN: usize = 200;
/// Maximum distinct values indexed per column.
const VALUES_PER_COLUMN: usize = 1000;

/// Build statistics, persisted with the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexStats {
    pub values_indexed: usize,
    pub descriptions: usize,
    pub tables_processed: usize,
}

/// A context-retrieval hit with the owning table's summary attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMatch {
    pub kind: String,
    pub table: String,
    pub column: Option<String>,
    pub similarity: f64,
    pub description: String,
}

#[derive(Serialize, Deserialize)]
struct CacheBlob {
    lsh: MinHashLsh,
    descriptions: DescriptionIndex,
    schema_descriptions: BTreeMap<String, String>,
    stats: IndexStats,
}

/// The preprocessor: both indexes plus per-table summary sentences.
pub struct Preprocessor {
    lsh: MinHashLsh,
    descriptions: DescriptionIndex,
    schema_descriptions: BTreeMap<String, String>,
    stats: IndexStats,
    backend: Arc<dyn EmbeddingBackend>,
}

impl Preprocessor {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            lsh: MinHashLsh::default(),
            descriptions: DescriptionIndex::default(),
            schema_descriptions: BTreeMap::new(),
            stats: IndexStats::default(),
            backend,
        }
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Add one value to the LSH index. The builder goes through this; it is
    /// also the entry point for callers indexing values from sources other
    /// than the catalog walk.
    pub fn add_value(&mut self, value: IndexedValue) {
        self.lsh.add(value);
        self.stats.values_indexed += 1;
    }

    /// Add one schema document to the description index.
    pub fn add_document(&mut self, doc: SchemaDoc) {
        if doc.kind == DocKind::Table {
            self.schema_descriptions
                .insert(doc.table.clone(), doc.text.clone());
            self.stats.descriptions += 1;
        }
        self.descriptions.add(doc, self.backend.as_ref());
    }

    // ========================================================================
    // BUILD
    // ========================================================================

    /// Build both indexes from the catalog. Metadata tables and leading
    /// underscore columns are skipped; only text columns are value-indexed.
    pub async fn build(&mut self, db: &DbClient, catalog: &SchemaCatalog) -> ClinsqlResult<IndexStats> {
        self.build_value_index(db, catalog).await?;
        self.build_description_index(catalog);
        tracing::info!(
            values = self.stats.values_indexed,
            descriptions = self.stats.descriptions,
            "preprocessing indexes built"
        );
        Ok(self.stats)
    }

    async fn build_value_index(
        &mut self,
        db: &DbClient,
        catalog: &SchemaCatalog,
    ) -> ClinsqlResult<()> {
        for table_name in catalog.table_names() {
            let Some(table) = catalog.table(&table_name) else {
                continue;
            };
            if table.is_metadata() {
                continue;
            }

            for column in &table.columns {
                if column.semantic_type != SemanticType::Text || column.name.starts_with('_') {
                    continue;
                }

                let values = match db
                    .distinct_values(&table.name, &column.name, VALUES_PER_COLUMN)
                    .await
                {
                    Ok(values) => values,
                    Err(e) => {
                        // Skip problematic columns rather than failing the build.
                        tracing::warn!(
                            table = %table.name,
                            column = %column.name,
                            error = %e,
                            "skipping column during value indexing"
                        );
                        continue;
                    }
                };

                for value in values {
                    if value.len() < MIN_VALUE_LEN || value.len() > MAX_VALUE_LEN {
                        continue;
                    }
                    self.add_value(IndexedValue {
                        value,
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
            self.stats.tables_processed += 1;
        }
        Ok(())
    }

    fn build_description_index(&mut self, catalog: &SchemaCatalog) {
        for table_name in catalog.table_names() {
            let Some(table) = catalog.table(&table_name) else {
                continue;
            };
            if table.is_metadata() {
                continue;
            }

            let mut column_descriptions = Vec::with_capacity(table.columns.len());
            for column in &table.columns {
                let readable = readable_name(&column.name);
                column_descriptions.push(format!("{} ({})", readable, column.data_type));

                self.add_document(SchemaDoc {
                    kind: DocKind::Column,
                    table: table.name.clone(),
                    column: Some(column.name.clone()),
                    text: format!("{} {} {}", table.name, column.name, readable),
                });
            }

            let mut table_description = format!(
                "Table {} contains: {}",
                table.name,
                column_descriptions
                    .iter()
                    .take(10)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if column_descriptions.len() > 10 {
                table_description.push_str(&format!(
                    " and {} more columns",
                    column_descriptions.len() - 10
                ));
            }

            self.add_document(SchemaDoc {
                kind: DocKind::Table,
                table: table.name.clone(),
                column: None,
                text: table_description,
            });
        }
    }

    // ========================================================================
    // RETRIEVAL
    // ========================================================================

    /// Entities matching a keyword: LSH candidates rescored with a blend of
    /// Jaccard and normalized edit-distance similarity.
    pub fn retrieve_entities(&self, keyword: &str, top_k: usize) -> Vec<EntityMatch> {
        let lsh_hits = self.lsh.query(keyword, top_k * 2);

        let mut matches: Vec<EntityMatch> = lsh_hits
            .into_iter()
            .map(|(value, lsh_similarity)| {
                let edit_similarity = edit_distance_similarity(keyword, &value.value);
                EntityMatch {
                    value: value.value.clone(),
                    table: value.table.clone(),
                    column: value.column.clone(),
                    score: 0.5 * (lsh_similarity + edit_similarity),
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.value.cmp(&b.value))
        });
        matches.truncate(top_k);
        matches
    }

    /// Schema context relevant to a free-text question.
    pub fn retrieve_context(&self, question: &str, top_k: usize) -> Vec<ContextMatch> {
        self.descriptions
            .search(question, top_k, self.backend.as_ref())
            .into_iter()
            .map(|hit| ContextMatch {
                kind: match hit.doc.kind {
                    DocKind::Table => "table".to_string(),
                    DocKind::Column => "column".to_string(),
                },
                table: hit.doc.table.clone(),
                column: hit.doc.column.clone(),
                similarity: hit.similarity,
                description: self
                    .schema_descriptions
                    .get(&hit.doc.table)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect()
    }

    // ========================================================================
    // CACHE
    // ========================================================================

    /// Serialize both indexes into the versioned cache blob.
    pub fn to_cache_bytes(&self) -> ClinsqlResult<Vec<u8>> {
        let blob = CacheBlob {
            lsh: self.lsh.clone(),
            descriptions: self.descriptions.clone(),
            schema_descriptions: self.schema_descriptions.clone(),
            stats: self.stats,
        };
        let payload = serde_json::to_vec(&blob).map_err(|e| IndexError::Io {
            path: "<memory>".to_string(),
            reason: e.to_string(),
        })?;

        let mut bytes = Vec::with_capacity(CACHE_MAGIC.len() + 1 + payload.len());
        bytes.extend_from_slice(CACHE_MAGIC);
        bytes.push(CACHE_VERSION);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Restore the indexes from cache bytes. Rejects blobs without the
    /// magic prefix or with a different version.
    pub fn from_cache_bytes(bytes: &[u8], backend: Arc<dyn EmbeddingBackend>) -> ClinsqlResult<Self> {
        if bytes.len() < CACHE_MAGIC.len() + 1 || &bytes[..CACHE_MAGIC.len()] != CACHE_MAGIC {
            return Err(IndexError::BadCache {
                path: "<memory>".to_string(),
                reason: "missing magic prefix".to_string(),
            }
            .into());
        }
        let version = bytes[CACHE_MAGIC.len()];
        if version != CACHE_VERSION {
            return Err(IndexError::VersionMismatch {
                expected: CACHE_VERSION,
                found: version,
            }
            .into());
        }

        let blob: CacheBlob =
            serde_json::from_slice(&bytes[CACHE_MAGIC.len() + 1..]).map_err(|e| {
                IndexError::BadCache {
                    path: "<memory>".to_string(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            lsh: blob.lsh,
            descriptions: blob.descriptions,
            schema_descriptions: blob.schema_descriptions,
            stats: blob.stats,
            backend,
        })
    }

    /// Persist the cache blob to disk.
    pub fn save_cache(&self, path: &Path) -> ClinsqlResult<()> {
        let bytes = self.to_cache_bytes()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(path, bytes).map_err(|e| {
            IndexError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Load the preprocessor from disk, or build and persist it when the
    /// cache is absent or unusable.
    pub async fn load_or_build(
        db: &DbClient,
        catalog: &SchemaCatalog,
        cache_path: &Path,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> ClinsqlResult<Self> {
        if let Ok(bytes) = std::fs::read(cache_path) {
            match Self::from_cache_bytes(&bytes, backend.clone()) {
                Ok(preprocessor) => {
                    tracing::info!(
                        values = preprocessor.stats.values_indexed,
                        descriptions = preprocessor.stats.descriptions,
                        "preprocessor cache loaded"
                    );
                    return Ok(preprocessor);
                }
                Err(e) => {
                    tracing::warn!(path = %cache_path.display(), error = %e, "rebuilding preprocessor cache");
                }
            }
        }

        let mut preprocessor = Self::new(backend);
        preprocessor.build(db, catalog).await?;
        preprocessor.save_cache(cache_path)?;
        Ok(preprocessor)
    }
}

impl std::fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preprocessor")
            .field("stats", &self.stats)
            .field("backend", &self.backend.backend_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_preprocessor() -> Preprocessor {
        let mut preprocessor = Preprocessor::new(Arc::new(FeatureEmbedder));
        for (value, table, column) in [
            ("Site 18", "sites", "site_number"),
            ("Site 21", "sites", "site_number"),
            ("JPN", "subjects", "country"),
            ("USA", "subjects", "country"),
            ("OPEN", "data_queries", "query_status"),
            ("CLOSED", "data_queries", "query_status"),
        ] {
            preprocessor.add_value(IndexedValue {
                value: value.to_string(),
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        preprocessor.add_document(SchemaDoc {
            kind: DocKind::Column,
            table: "data_queries".to_string(),
            column: Some("days_open".to_string()),
            text: "data_queries days_open Days Open".to_string(),
        });
        preprocessor.add_document(SchemaDoc {
            kind: DocKind::Table,
            table: "data_queries".to_string(),
            column: None,
            text: "Table data_queries contains: Days Open (integer)".to_string(),
        });
        preprocessor
    }

    #[test]
    fn test_retrieve_entities_resolves_site_literal() {
        let preprocessor = make_test_preprocessor();
        let matches = preprocessor.retrieve_entities("Site 18", 5);
        assert!(!matches.is_empty());
        assert_eq!(matches[0].value, "Site 18");
        assert_eq!(matches[0].table, "sites");
        assert_eq!(matches[0].column, "site_number");
        assert!(matches[0].score > 0.9);
    }

    #[test]
    fn test_retrieve_entities_resolves_country_code() {
        let preprocessor = make_test_preprocessor();
        let matches = preprocessor.retrieve_entities("JPN", 5);
        assert_eq!(matches[0].value, "JPN");
        assert_eq!(matches[0].column, "country");
    }

    #[test]
    fn test_retrieve_context_attaches_description() {
        let preprocessor = make_test_preprocessor();
        let matches = preprocessor.retrieve_context("average days open", 3);
        assert!(!matches.is_empty());
        assert_eq!(matches[0].table, "data_queries");
        assert!(matches[0].description.starts_with("Table data_queries"));
    }

    #[test]
    fn test_cache_round_trip_is_byte_identical() {
        let preprocessor = make_test_preprocessor();
        let first = preprocessor.to_cache_bytes().unwrap();
        let restored = Preprocessor::from_cache_bytes(&first, Arc::new(FeatureEmbedder)).unwrap();
        let second = restored.to_cache_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_rejects_bad_magic() {
        let result = Preprocessor::from_cache_bytes(b"NOT-AN-INDEX-BLOB", Arc::new(FeatureEmbedder));
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_rejects_version_mismatch() {
        let preprocessor = make_test_preprocessor();
        let mut bytes = preprocessor.to_cache_bytes().unwrap();
        bytes[CACHE_MAGIC.len()] = CACHE_VERSION + 1;
        let result = Preprocessor::from_cache_bytes(&bytes, Arc::new(FeatureEmbedder));
        assert!(matches!(
            result,
            Err(clinsql_core::ClinsqlError::Index(IndexError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn test_restored_index_answers_queries() {
        let preprocessor = make_test_preprocessor();
        let bytes = preprocessor.to_cache_bytes().unwrap();
        let restored = Preprocessor::from_cache_bytes(&bytes, Arc::new(FeatureEmbedder)).unwrap();
        let matches = restored.retrieve_entities("site 18", 3);
        assert_eq!(matches[0].value, "Site 18");
    }
}
