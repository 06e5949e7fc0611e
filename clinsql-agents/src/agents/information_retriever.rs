//! Information Retriever Agent (IR)
//!
//! Gathers everything the later stages need to know about the question:
//! parsed keywords, entity literals resolved against the LSH value index,
//! semantic schema context, and the pooled list of candidate tables.

use crate::agents::elapsed_secs;
use crate::tools::ir::{self, ContextResult, EntityMatches};
use crate::Services;
use clinsql_core::{AgentResult, ParsedKeywords};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Static map from clinical vocabulary to catalog category tags.
const TERM_CATEGORIES: [(&str, &str); 14] = [
    ("visit", "visit"),
    ("sae", "safety"),
    ("serious adverse event", "safety"),
    ("adverse event", "safety"),
    ("ae", "safety"),
    ("query", "query"),
    ("open query", "query"),
    ("meddra", "coding"),
    ("whodd", "coding"),
    ("coded", "coding"),
    ("enrolled", "enrollment"),
    ("enrollment", "enrollment"),
    ("protocol deviation", "deviation"),
    ("sdv", "verification"),
];

/// Literal phrases that mean the user is asking about the database itself.
const METADATA_PHRASES: [&str; 6] = [
    "how many studies",
    "number of studies",
    "how many tables",
    "database structure",
    "tables in the database",
    "about the database",
];

const METADATA_TABLES: [&str; 2] = ["_studies", "_table_metadata"];

pub struct InformationRetrieverAgent {
    services: Arc<Services>,
}

impl InformationRetrieverAgent {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn execute(&self, question: &str, cancel: &CancellationToken) -> AgentResult {
        let start = Instant::now();
        let mut result = AgentResult::ok(json!(null), "");

        // Step 1: keyword extraction (LLM with deterministic fallback).
        let keywords_tool = match ir::extract_keywords(&self.services, question, cancel).await {
            Ok(tool) => tool,
            Err(e) => {
                let mut failed = AgentResult::fail(e.to_string());
                failed.execution_time = elapsed_secs(start);
                return failed;
            }
        };
        let keywords: ParsedKeywords = keywords_tool
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
            .unwrap_or_else(|| ParsedKeywords::from_whitespace(question));
        result.accumulate_tool(keywords_tool);

        // Step 2: entity retrieval over the LSH index.
        let entity_tool = match ir::retrieve_entity(&self.services, &keywords) {
            Ok(tool) => tool,
            Err(e) => {
                let mut failed = AgentResult::fail(e.to_string());
                failed.execution_time = elapsed_secs(start);
                return failed;
            }
        };
        let entities: EntityMatches = entity_tool
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
            .unwrap_or_default();
        result.accumulate_tool(entity_tool);

        // Step 3: semantic context over the description index.
        let context_tool = match ir::retrieve_context(&self.services, question) {
            Ok(tool) => tool,
            Err(e) => {
                let mut failed = AgentResult::fail(e.to_string());
                failed.execution_time = elapsed_secs(start);
                return failed;
            }
        };
        let context: ContextResult = context_tool
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
            .unwrap_or_default();
        result.accumulate_tool(context_tool);

        let relevant_tables = self.pool_tables(question, &keywords, &entities, &context);

        result.reasoning = format!(
            "Extracted {} keywords, matched {} entity literals, pooled {} candidate tables",
            keywords.keywords.len() + keywords.entities.len(),
            entities.matches.values().map(|v| v.len()).sum::<usize>(),
            relevant_tables.len()
        );
        result.data = Some(json!({
            "question": question,
            "keywords": keywords,
            "entities": entities,
            "context": context,
            "relevant_tables": relevant_tables,
        }));
        result.execution_time = elapsed_secs(start);
        result
    }

    /// Pool candidate tables from entity matches, context hits, and the
    /// clinical term-to-category map; force the metadata tables in for
    /// questions about the database itself.
    fn pool_tables(
        &self,
        question: &str,
        keywords: &ParsedKeywords,
        entities: &EntityMatches,
        context: &ContextResult,
    ) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        let mut push = |name: &str, tables: &mut Vec<String>| {
            if self.services.catalog.contains(name) && !tables.iter().any(|t| t == name) {
                tables.push(name.to_string());
            }
        };

        let question_lower = question.to_lowercase();
        if METADATA_PHRASES.iter().any(|p| question_lower.contains(p)) {
            for table in METADATA_TABLES {
                push(table, &mut tables);
            }
        }

        for hits in entities.matches.values() {
            for hit in hits {
                push(&hit.table, &mut tables);
            }
        }

        for relevant in &context.relevant_tables {
            push(&relevant.table, &mut tables);
        }

        for term in &keywords.clinical_terms {
            let term = term.to_lowercase();
            for (vocab, category) in TERM_CATEGORIES {
                if term.contains(vocab) {
                    for table in self.services.catalog.tables_by_category(category) {
                        push(&table.name, &mut tables);
                    }
                }
            }
        }

        tables
    }
}
