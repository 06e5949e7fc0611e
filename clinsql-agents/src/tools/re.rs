//! Result Explainer tools: explain_results, summarize_large_results,
//! split_complex_query

use crate::prompts;
use crate::tools::tool_llm_call;
use crate::Services;
use clinsql_core::{ClinsqlResult, ExecutionOutcome, ToolResult};
use clinsql_llm::{extract_json, extract_sql, ChatMessage, ChatRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio_util::sync::CancellationToken;

static JOIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJOIN\b").expect("static regex"));

/// Number of JOIN keywords in a statement.
pub fn count_joins(sql: &str) -> usize {
    JOIN_RE.find_iter(sql).count()
}

/// Explanation payload shared by the explain/summarize tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub explanation: String,
}

/// One sub-query proposed by the splitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitQuery {
    pub sql: String,
    pub description: String,
}

/// Decision of the splitter. `should_split = false` (or an empty query
/// list) means "keep the query whole"; it is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SplitDecision {
    pub should_split: bool,
    pub queries: Vec<SplitQuery>,
}

/// Render up to `limit` rows for a prompt.
pub fn format_rows(rows: &[JsonValue], limit: usize) -> String {
    rows.iter()
        .take(limit)
        .map(|row| row.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-column statistics over the full result: numeric columns get
/// min/max/mean/count, categorical columns get unique count and up to five
/// sample values.
pub fn column_statistics(outcome: &ExecutionOutcome) -> JsonValue {
    let mut stats = serde_json::Map::new();

    for column in &outcome.columns {
        let values: Vec<&JsonValue> = outcome
            .data
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_null())
            .collect();

        let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();

        let column_stats = if !numbers.is_empty() && numbers.len() == values.len() {
            let count = numbers.len();
            let sum: f64 = numbers.iter().sum();
            let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            json!({
                "kind": "numeric",
                "count": count,
                "min": min,
                "max": max,
                "mean": sum / count as f64,
            })
        } else {
            let mut unique: Vec<String> = Vec::new();
            for value in &values {
                let text = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !unique.contains(&text) {
                    unique.push(text);
                }
            }
            let samples: Vec<&String> = unique.iter().take(5).collect();
            json!({
                "kind": "categorical",
                "unique_count": unique.len(),
                "samples": samples,
            })
        };

        stats.insert(column.clone(), column_stats);
    }

    JsonValue::Object(stats)
}

/// Explain a small result set (up to 20 formatted rows) in natural
/// language.
pub async fn explain_results(
    services: &Services,
    question: &str,
    sql: &str,
    outcome: &ExecutionOutcome,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let request = ChatRequest::new(
        services.config.models.sql_generator.clone(),
        vec![
            ChatMessage::system(prompts::EXPLAIN_RESULTS_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::EXPLAIN_RESULTS_USER,
                &[
                    ("question", question),
                    ("sql", sql),
                    ("row_count", &outcome.row_count.to_string()),
                    ("rows", &format_rows(&outcome.data, 20)),
                ],
            )),
        ],
    )
    .with_temperature(0.3)
    .with_max_tokens(1024);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    match response.content {
        Some(content) if !content.trim().is_empty() => {
            let payload = Explanation {
                explanation: content.trim().to_string(),
            };
            Ok(ToolResult::ok("explain_results", serde_json::to_value(&payload)?)
                .with_tokens(tokens))
        }
        _ => Ok(ToolResult::fail("explain_results", "model returned no explanation")
            .with_tokens(tokens)),
    }
}

/// Summarize a large result set from per-column statistics plus head/tail
/// sample rows.
pub async fn summarize_large_results(
    services: &Services,
    question: &str,
    sql: &str,
    outcome: &ExecutionOutcome,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let statistics = column_statistics(outcome);
    let tail_start = outcome.data.len().saturating_sub(5);

    let request = ChatRequest::new(
        services.config.models.sql_generator.clone(),
        vec![
            ChatMessage::system(prompts::EXPLAIN_RESULTS_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::SUMMARIZE_LARGE_RESULTS_USER,
                &[
                    ("question", question),
                    ("sql", sql),
                    ("row_count", &outcome.row_count.to_string()),
                    ("statistics", &statistics.to_string()),
                    ("head_rows", &format_rows(&outcome.data, 10)),
                    ("tail_rows", &format_rows(&outcome.data[tail_start..], 5)),
                ],
            )),
        ],
    )
    .with_temperature(0.3)
    .with_max_tokens(1536);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    match response.content {
        Some(content) if !content.trim().is_empty() => {
            let data = json!({
                "explanation": content.trim(),
                "statistics": statistics,
            });
            Ok(ToolResult::ok("summarize_large_results", data).with_tokens(tokens))
        }
        _ => Ok(
            ToolResult::fail("summarize_large_results", "model returned no summary")
                .with_tokens(tokens),
        ),
    }
}

/// Ask whether a multi-join query should be split into simpler queries.
/// Any unusable response resolves to "do not split".
pub async fn split_complex_query(
    services: &Services,
    question: &str,
    sql: &str,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let request = ChatRequest::new(
        services.config.models.evaluator.clone(),
        vec![
            ChatMessage::system(prompts::SPLIT_QUERY_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::SPLIT_QUERY_USER,
                &[("question", question), ("sql", sql)],
            )),
        ],
    )
    .with_temperature(services.config.agent.temperature)
    .with_max_tokens(1536)
    .with_json_mode(true);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    let mut decision = SplitDecision::default();
    if let Some(value) = response.content.as_deref().and_then(extract_json) {
        let should_split = value
            .get("should_split")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if should_split {
            if let Some(items) = value.get("queries").and_then(|v| v.as_array()) {
                for item in items.iter().take(3) {
                    let Some(raw_sql) = item.get("sql").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let Some(sub_sql) = extract_sql(raw_sql) else {
                        continue;
                    };
                    decision.queries.push(SplitQuery {
                        sql: sub_sql,
                        description: item
                            .get("description")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                    });
                }
            }
            // should_split with an empty list still means "do not split".
            decision.should_split = !decision.queries.is_empty();
        }
    }

    Ok(ToolResult::ok("split_complex_query", serde_json::to_value(&decision)?)
        .with_tokens(tokens))
}
