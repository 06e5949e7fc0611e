//! Information Retriever tools: extract_keywords, retrieve_entity,
//! retrieve_context

use crate::prompts;
use crate::tools::tool_llm_call;
use crate::Services;
use clinsql_core::{ClinsqlResult, EntityMatch, ParsedKeywords, ToolResult};
use clinsql_index::ContextMatch;
use clinsql_llm::{extract_json, ChatMessage, ChatRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Grouped LSH matches per keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntityMatches {
    pub matches: BTreeMap<String, Vec<EntityMatch>>,
}

/// Per-table accumulation of context hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantTable {
    pub table: String,
    pub columns: Vec<String>,
    pub best_similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContextResult {
    pub hits: Vec<ContextMatch>,
    pub relevant_tables: Vec<RelevantTable>,
}

/// Extract keywords, entities, clinical terms, and filter hints from the
/// question. One JSON-mode LLM call with few-shot examples; falls back to
/// whitespace tokenization when the response is missing or malformed.
pub async fn extract_keywords(
    services: &Services,
    question: &str,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let request = ChatRequest::new(
        services.config.models.evaluator.clone(),
        vec![
            ChatMessage::system(prompts::EXTRACT_KEYWORDS_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::EXTRACT_KEYWORDS_USER,
                &[("question", question)],
            )),
        ],
    )
    .with_temperature(services.config.agent.temperature)
    .with_max_tokens(1024)
    .with_json_mode(true);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    let parsed = response
        .content
        .as_deref()
        .and_then(extract_json)
        .map(parse_keyword_json);

    let payload = match parsed {
        Some(parsed) if !parsed.keywords.is_empty() || !parsed.entities.is_empty() => parsed,
        _ => {
            tracing::warn!("keyword extraction fell back to whitespace tokenization");
            ParsedKeywords::from_whitespace(question)
        }
    };

    Ok(ToolResult::ok("extract_keywords", serde_json::to_value(&payload)?).with_tokens(tokens))
}

fn parse_keyword_json(value: JsonValue) -> ParsedKeywords {
    let strings = |field: &str| -> Vec<String> {
        value
            .get(field)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    };
    ParsedKeywords {
        keywords: strings("keywords"),
        entities: strings("entities"),
        clinical_terms: strings("clinical_terms"),
        filters: strings("filters"),
    }
}

/// Query the LSH value index for every keyword and entity of length >= 2.
/// No LLM involvement.
pub fn retrieve_entity(services: &Services, keywords: &ParsedKeywords) -> ClinsqlResult<ToolResult> {
    let mut matches = BTreeMap::new();
    for keyword in keywords.keywords.iter().chain(&keywords.entities) {
        if keyword.chars().count() < 2 || matches.contains_key(keyword) {
            continue;
        }
        let hits = services.preprocessor.retrieve_entities(keyword, 5);
        if !hits.is_empty() {
            matches.insert(keyword.clone(), hits);
        }
    }
    let payload = EntityMatches { matches };
    Ok(ToolResult::ok("retrieve_entity", serde_json::to_value(&payload)?))
}

/// Query the description index with the full question and fold the hits
/// into per-table accumulations.
pub fn retrieve_context(services: &Services, question: &str) -> ClinsqlResult<ToolResult> {
    let hits = services.preprocessor.retrieve_context(question, 10);

    let mut tables: BTreeMap<String, RelevantTable> = BTreeMap::new();
    for hit in &hits {
        let entry = tables
            .entry(hit.table.clone())
            .or_insert_with(|| RelevantTable {
                table: hit.table.clone(),
                columns: Vec::new(),
                best_similarity: 0.0,
            });
        if let Some(column) = &hit.column {
            if !entry.columns.contains(column) {
                entry.columns.push(column.clone());
            }
        }
        if hit.similarity > entry.best_similarity {
            entry.best_similarity = hit.similarity;
        }
    }

    let mut relevant_tables: Vec<RelevantTable> = tables.into_values().collect();
    relevant_tables.sort_by(|a, b| {
        b.best_similarity
            .partial_cmp(&a.best_similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.table.cmp(&b.table))
    });

    let payload = ContextResult {
        hits,
        relevant_tables,
    };
    Ok(ToolResult::ok("retrieve_context", serde_json::to_value(&payload)?))
}
