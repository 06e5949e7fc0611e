//! Schema Selector tools: select_tables, select_columns

use crate::prompts;
use crate::tools::tool_llm_call;
use crate::Services;
use clinsql_catalog::DetailLevel;
use clinsql_core::{ClinsqlResult, ColumnRole, ParsedKeywords, SelectedTable, TableRole, ToolResult};
use clinsql_llm::{extract_json, ChatMessage, ChatRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Outcome of the table-selection step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TableSelection {
    pub tables: Vec<SelectedTable>,
    pub join_hints: Vec<String>,
}

/// Outcome of the per-table column-selection step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnSelection {
    pub columns: Vec<(String, ColumnRole)>,
    /// True when the LLM step failed and every column was kept.
    pub kept_all: bool,
}

/// Relevance verdict for one column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRelevance {
    pub column: String,
    pub relevant: bool,
    pub reason: String,
}

/// Deterministic relevance check for the columns of one table: a column is
/// relevant when a question token and a column-name token overlap, or when
/// a question token appears among the column's sample values. Used to patch
/// columns the model selection missed.
pub fn filter_column(services: &Services, question: &str, table: &str) -> ClinsqlResult<ToolResult> {
    let Some(table_info) = services.catalog.table(table) else {
        return Ok(ToolResult::fail(
            "filter_column",
            format!("table not found in catalog: {}", table),
        ));
    };

    let tokens: Vec<String> = question
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() >= 3)
        .collect();

    let mut verdicts = Vec::with_capacity(table_info.columns.len());
    for column in &table_info.columns {
        let name_tokens: Vec<&str> = column.name.split('_').collect();
        let name_hit = tokens.iter().find(|token| {
            name_tokens
                .iter()
                .any(|part| part.contains(token.as_str()) || token.contains(*part))
        });
        let value_hit = name_hit.is_none().then(|| {
            tokens.iter().find(|token| {
                column
                    .sample_values
                    .iter()
                    .any(|value| value.to_lowercase().contains(token.as_str()))
            })
        })
        .flatten();

        let (relevant, reason) = match (name_hit, value_hit) {
            (Some(token), _) => (true, format!("name matches question token '{}'", token)),
            (None, Some(token)) => (true, format!("sample values contain '{}'", token)),
            (None, None) => (false, String::new()),
        };
        verdicts.push(ColumnRelevance {
            column: column.name.clone(),
            relevant,
            reason,
        });
    }

    Ok(ToolResult::ok("filter_column", serde_json::to_value(&verdicts)?))
}

/// Rank candidate tables with one JSON LLM call over a medium-detail
/// schema block. Tables the catalog does not know are dropped from the
/// response; an unusable response fails the tool so the agent can take its
/// fallback path.
pub async fn select_tables(
    services: &Services,
    question: &str,
    keywords: &ParsedKeywords,
    candidates: &[String],
    max_tables: usize,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let shortlist: Vec<String> = candidates.iter().take(15).cloned().collect();
    let schema_block = services.catalog.project(
        &shortlist,
        services.config.token_limits.max_schema_tokens,
        DetailLevel::Medium,
    );

    let request = ChatRequest::new(
        services.config.models.schema_selector.clone(),
        vec![
            ChatMessage::system(prompts::SELECT_TABLES_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::SELECT_TABLES_USER,
                &[
                    ("schema_context", &schema_block),
                    ("question", question),
                    ("keywords", &keywords.keywords.join(", ")),
                    ("entities", &keywords.entities.join(", ")),
                    ("max_tables", &max_tables.to_string()),
                ],
            )),
        ],
    )
    .with_temperature(services.config.agent.temperature)
    .with_max_tokens(1024)
    .with_json_mode(true);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    let Some(value) = response.content.as_deref().and_then(extract_json) else {
        return Ok(
            ToolResult::fail("select_tables", "no usable JSON in model response")
                .with_tokens(tokens),
        );
    };

    let mut tables = Vec::new();
    if let Some(items) = value.get("tables").and_then(|v| v.as_array()) {
        for item in items {
            let Some(name) = item.get("table").and_then(|v| v.as_str()) else {
                continue;
            };
            if !services.catalog.contains(name) {
                continue;
            }
            if tables.iter().any(|t: &SelectedTable| t.table == name) {
                continue;
            }
            let role = match item.get("role").and_then(|v| v.as_str()) {
                Some("join") => TableRole::Join,
                Some("filter") => TableRole::Filter,
                _ => TableRole::Primary,
            };
            tables.push(SelectedTable {
                table: name.to_string(),
                role,
                reason: item
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                columns: Vec::new(),
            });
            if tables.len() >= max_tables {
                break;
            }
        }
    }

    if tables.is_empty() {
        return Ok(
            ToolResult::fail("select_tables", "model selected no known tables").with_tokens(tokens),
        );
    }

    let join_hints = value
        .get("join_hints")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let payload = TableSelection { tables, join_hints };
    Ok(ToolResult::ok("select_tables", serde_json::to_value(&payload)?).with_tokens(tokens))
}

/// Pick the needed columns of one table. On any failure every column is
/// kept, which is always safe.
pub async fn select_columns(
    services: &Services,
    question: &str,
    table: &str,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let Some(table_info) = services.catalog.table(table) else {
        return Ok(ToolResult::fail(
            "select_columns",
            format!("table not found in catalog: {}", table),
        ));
    };

    let request = ChatRequest::new(
        services.config.models.schema_selector.clone(),
        vec![
            ChatMessage::system(prompts::SELECT_COLUMNS_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::SELECT_COLUMNS_USER,
                &[("table_ddl", &table_info.to_ddl(false)), ("question", question)],
            )),
        ],
    )
    .with_temperature(services.config.agent.temperature)
    .with_max_tokens(1024)
    .with_json_mode(true);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    let mut columns: Vec<(String, ColumnRole)> = Vec::new();
    if let Some(value) = response.content.as_deref().and_then(extract_json) {
        if let Some(items) = value.get("columns").and_then(|v| v.as_array()) {
            for item in items {
                let Some(name) = item.get("name").and_then(|v| v.as_str()) else {
                    continue;
                };
                if !table_info.has_column(name) {
                    continue;
                }
                if columns.iter().any(|(existing, _)| existing == name) {
                    continue;
                }
                let role = match item.get("role").and_then(|v| v.as_str()) {
                    Some("WHERE") => ColumnRole::Where,
                    Some("JOIN") => ColumnRole::Join,
                    Some("GROUP BY") | Some("GROUP_BY") => ColumnRole::GroupBy,
                    _ => ColumnRole::Select,
                };
                columns.push((name.to_string(), role));
            }
        }
    }

    let payload = if columns.is_empty() {
        tracing::warn!(table, "column selection kept all columns");
        ColumnSelection {
            columns: table_info
                .columns
                .iter()
                .map(|c| (c.name.clone(), ColumnRole::Select))
                .collect(),
            kept_all: true,
        }
    } else {
        ColumnSelection {
            columns,
            kept_all: false,
        }
    };

    Ok(ToolResult::ok("select_columns", serde_json::to_value(&payload)?).with_tokens(tokens))
}
