//! Semantic description index
//!
//! One document per table and per column, embedded for retrieval by
//! free-text question. Documents and embeddings live in parallel flat
//! vectors for serialization and lock-free concurrent reads.

use crate::embed::{cosine_similarity, EmbeddingBackend};
use serde::{Deserialize, Serialize};

/// Kind of schema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Table,
    Column,
}

/// One schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDoc {
    pub kind: DocKind,
    pub table: String,
    /// Present for column documents.
    pub column: Option<String>,
    /// The text that was embedded.
    pub text: String,
}

/// A search hit over the description index.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextHit<'a> {
    pub doc: &'a SchemaDoc,
    pub similarity: f64,
}

/// Vector index over schema descriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptionIndex {
    documents: Vec<SchemaDoc>,
    embeddings: Vec<Vec<f32>>,
}

impl DescriptionIndex {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn add(&mut self, doc: SchemaDoc, backend: &dyn EmbeddingBackend) {
        self.embeddings.push(backend.embed(&doc.text));
        self.documents.push(doc);
    }

    /// Top-k documents by cosine similarity to the query.
    pub fn search(&self, query: &str, top_k: usize, backend: &dyn EmbeddingBackend) -> Vec<ContextHit<'_>> {
        if self.documents.is_empty() {
            return Vec::new();
        }
        let query_embedding = backend.embed(query);

        let mut hits: Vec<ContextHit<'_>> = self
            .documents
            .iter()
            .zip(&self.embeddings)
            .map(|(doc, embedding)| ContextHit {
                doc,
                similarity: cosine_similarity(&query_embedding, embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc.text.cmp(&b.doc.text))
        });
        hits.truncate(top_k);
        hits
    }
}

/// Readable form of a column name: underscores to spaces, title case.
pub fn readable_name(column: &str) -> String {
    column
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
