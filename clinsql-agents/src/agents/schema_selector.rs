//! Schema Selector Agent (SS)
//!
//! Reduces the schema to the tables and columns the generator actually
//! needs, and renders the token-budgeted schema context string that is the
//! only schema the generator ever sees.

use crate::agents::elapsed_secs;
use crate::tools::ss::{self, ColumnSelection, TableSelection};
use crate::Services;
use clinsql_catalog::DetailLevel;
use clinsql_core::{AgentResult, ColumnRole, LinkedSchema, ParsedKeywords, SelectedTable, TableRole};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const MAX_TABLES: usize = 5;

pub struct SchemaSelectorAgent {
    services: Arc<Services>,
}

impl SchemaSelectorAgent {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn execute(
        &self,
        question: &str,
        ir_data: &JsonValue,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let start = Instant::now();
        let mut result = AgentResult::ok(json!(null), "");

        let keywords: ParsedKeywords = ir_data
            .get("keywords")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let mut candidates: Vec<String> = ir_data
            .get("relevant_tables")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        // Zero IR candidates: try a column-name search over the keywords,
        // then fall back to the first five catalog tables.
        if candidates.is_empty() {
            for keyword in &keywords.keywords {
                if keyword.len() < 3 {
                    continue;
                }
                for hit in self.services.catalog.search_columns(keyword) {
                    if !candidates.contains(&hit.table) {
                        candidates.push(hit.table);
                    }
                }
            }
        }
        if candidates.is_empty() {
            candidates = self
                .services
                .catalog
                .table_names()
                .into_iter()
                .take(MAX_TABLES)
                .collect();
            tracing::warn!("IR produced no candidate tables, using catalog head");
        }

        // Step A: table selection.
        let selection = match ss::select_tables(
            &self.services,
            question,
            &keywords,
            &candidates,
            MAX_TABLES,
            cancel,
        )
        .await
        {
            Ok(tool) => {
                let parsed: Option<TableSelection> = tool
                    .data
                    .as_ref()
                    .and_then(|data| serde_json::from_value(data.clone()).ok());
                result.accumulate_tool(tool);
                parsed
            }
            Err(e) => {
                let mut failed = AgentResult::fail(e.to_string());
                failed.execution_time = elapsed_secs(start);
                failed.tool_calls = result.tool_calls;
                return failed;
            }
        };

        let mut selection = selection.unwrap_or_else(|| {
            // Step A fallback: first five candidates, all columns.
            tracing::warn!("table selection failed, keeping first five IR candidates");
            TableSelection {
                tables: candidates
                    .iter()
                    .take(MAX_TABLES)
                    .enumerate()
                    .map(|(i, table)| SelectedTable {
                        table: table.clone(),
                        role: if i == 0 { TableRole::Primary } else { TableRole::Join },
                        reason: String::new(),
                        columns: Vec::new(),
                    })
                    .collect(),
                join_hints: Vec::new(),
            }
        });

        // Step B: per-table column selection.
        for selected in &mut selection.tables {
            match ss::select_columns(&self.services, question, &selected.table, cancel).await {
                Ok(tool) => {
                    let parsed: Option<ColumnSelection> = tool
                        .data
                        .as_ref()
                        .and_then(|data| serde_json::from_value(data.clone()).ok());
                    result.accumulate_tool(tool);
                    if let Some(parsed) = parsed {
                        selected.columns = parsed.columns;
                    }
                }
                Err(e) => {
                    let mut failed = AgentResult::fail(e.to_string());
                    failed.execution_time = elapsed_secs(start);
                    failed.tool_calls = result.tool_calls;
                    return failed;
                }
            }
            if selected.columns.is_empty() {
                if let Some(info) = self.services.catalog.table(&selected.table) {
                    selected.columns = info
                        .columns
                        .iter()
                        .map(|c| (c.name.clone(), ColumnRole::Select))
                        .collect();
                }
                continue;
            }

            // Patch in columns the model missed but the question clearly
            // touches.
            if let Ok(filter_tool) =
                ss::filter_column(&self.services, question, &selected.table)
            {
                let verdicts: Vec<ss::ColumnRelevance> = filter_tool
                    .data
                    .as_ref()
                    .and_then(|data| serde_json::from_value(data.clone()).ok())
                    .unwrap_or_default();
                result.accumulate_tool(filter_tool);
                for verdict in verdicts {
                    if verdict.relevant
                        && !selected.columns.iter().any(|(name, _)| *name == verdict.column)
                    {
                        selected.columns.push((verdict.column, ColumnRole::Where));
                    }
                }
            }
        }

        // Step C: render the optimized schema context.
        let linked = self.render(selection);

        result.reasoning = format!(
            "Selected {} tables ({} join hints)",
            linked.selected_tables.len(),
            linked.join_hints.len()
        );
        result.data = serde_json::to_value(&linked).ok();
        if result.data.is_none() {
            let mut failed = AgentResult::fail("failed to serialize linked schema");
            failed.execution_time = elapsed_secs(start);
            return failed;
        }
        result.execution_time = elapsed_secs(start);
        result
    }

    fn render(&self, selection: TableSelection) -> LinkedSchema {
        let table_names: Vec<String> =
            selection.tables.iter().map(|t| t.table.clone()).collect();

        let mut join_hints = selection.join_hints.clone();
        for name in &table_names {
            if let Some(info) = self.services.catalog.table(name) {
                for fk in &info.foreign_keys {
                    if table_names.contains(&fk.references_table) {
                        let hint = format!(
                            "{}.{} = {}.{}",
                            name, fk.column, fk.references_table, fk.references_column
                        );
                        if !join_hints.contains(&hint) {
                            join_hints.push(hint);
                        }
                    }
                }
            }
        }

        let mut schema_context = self.services.catalog.project(
            &table_names,
            self.services.config.token_limits.max_schema_tokens,
            DetailLevel::Medium,
        );
        if !join_hints.is_empty() {
            schema_context.push_str("\n\n-- JOIN RELATIONSHIPS:");
            for hint in &join_hints {
                schema_context.push_str(&format!("\n-- {}", hint));
            }
        }

        let primary_table = selection
            .tables
            .iter()
            .find(|t| t.role == TableRole::Primary)
            .or_else(|| selection.tables.first())
            .map(|t| t.table.clone());

        LinkedSchema {
            selected_tables: selection.tables,
            join_hints,
            schema_context,
            primary_table,
        }
    }
}
