//! Result Explainer Agent (RE)
//!
//! Turns an execution result into a natural-language answer. Empty results
//! get a canned explanation with no LLM call; small results are explained
//! directly; large results are summarized from per-column statistics; and
//! multi-join queries may first be split into simpler sub-queries, each
//! executed and explained separately.

use crate::agents::elapsed_secs;
use crate::tools::re::{self, count_joins, Explanation, SplitDecision};
use crate::Services;
use clinsql_core::{AgentResult, ExecutionOutcome};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const SMALL_RESULT_ROWS: usize = 50;
const SPLIT_JOIN_THRESHOLD: usize = 2;
const SUBQUERY_TIMEOUT_SECS: u64 = 30;

pub struct ResultExplainerAgent {
    services: Arc<Services>,
}

impl ResultExplainerAgent {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn execute(
        &self,
        question: &str,
        sql: &str,
        outcome: &ExecutionOutcome,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let start = Instant::now();

        // Empty result: canned empathetic explanation, no LLM call.
        if outcome.row_count == 0 {
            let mut result = AgentResult::ok(
                json!({
                    "explanation": crate::prompts::EMPTY_RESULT_EXPLANATION,
                    "row_count": 0,
                    "is_sampled": false,
                    "is_split": false,
                }),
                "Empty result explained without a model call",
            );
            result.execution_time = elapsed_secs(start);
            return result;
        }

        let mut result = AgentResult::ok(json!(null), "");

        // Complex join: see whether splitting helps interpretation.
        if count_joins(sql) >= SPLIT_JOIN_THRESHOLD {
            match self
                .try_split(question, sql, outcome, &mut result, cancel)
                .await
            {
                Ok(Some(data)) => {
                    result.reasoning = "Explained via split sub-queries".to_string();
                    result.data = Some(data);
                    result.execution_time = elapsed_secs(start);
                    return result;
                }
                Ok(None) => {} // do not split; fall through
                Err(e) => return timed_failure(e.to_string(), start, result),
            }
        }

        // Small vs large result.
        let explained = if outcome.row_count <= SMALL_RESULT_ROWS {
            self.explain_small(question, sql, outcome, &mut result, cancel)
                .await
        } else {
            self.explain_large(question, sql, outcome, &mut result, cancel)
                .await
        };

        match explained {
            Ok(Some(data)) => {
                result.reasoning = "Generated explanation".to_string();
                result.data = Some(data);
                result.execution_time = elapsed_secs(start);
                result
            }
            Ok(None) => timed_failure(
                "explanation tool returned no content".to_string(),
                start,
                result,
            ),
            Err(e) => timed_failure(e.to_string(), start, result),
        }
    }

    async fn explain_small(
        &self,
        question: &str,
        sql: &str,
        outcome: &ExecutionOutcome,
        result: &mut AgentResult,
        cancel: &CancellationToken,
    ) -> clinsql_core::ClinsqlResult<Option<serde_json::Value>> {
        let tool = re::explain_results(&self.services, question, sql, outcome, cancel).await?;
        let parsed: Option<Explanation> = tool
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok());
        result.accumulate_tool(tool);

        Ok(parsed.map(|explanation| {
            json!({
                "explanation": explanation.explanation,
                "row_count": outcome.row_count,
                "is_sampled": false,
                "is_split": false,
            })
        }))
    }

    async fn explain_large(
        &self,
        question: &str,
        sql: &str,
        outcome: &ExecutionOutcome,
        result: &mut AgentResult,
        cancel: &CancellationToken,
    ) -> clinsql_core::ClinsqlResult<Option<serde_json::Value>> {
        let tool =
            re::summarize_large_results(&self.services, question, sql, outcome, cancel).await?;
        let data = tool.data.clone();
        result.accumulate_tool(tool);

        Ok(data.map(|payload| {
            json!({
                "explanation": payload.get("explanation").cloned().unwrap_or_default(),
                "statistics": payload.get("statistics").cloned(),
                "row_count": outcome.row_count,
                "is_sampled": true,
                "is_split": false,
            })
        }))
    }

    /// Decide whether to split, and when splitting is chosen execute and
    /// explain each sub-query, combining the pieces under one header.
    /// `Ok(None)` means "keep the query whole".
    async fn try_split(
        &self,
        question: &str,
        sql: &str,
        outcome: &ExecutionOutcome,
        result: &mut AgentResult,
        cancel: &CancellationToken,
    ) -> clinsql_core::ClinsqlResult<Option<serde_json::Value>> {
        let tool = re::split_complex_query(&self.services, question, sql, cancel).await?;
        let decision: Option<SplitDecision> = tool
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok());
        result.accumulate_tool(tool);

        let Some(decision) = decision else {
            return Ok(None);
        };
        if !decision.should_split || decision.queries.is_empty() {
            return Ok(None);
        }

        let mut sections = Vec::new();
        let mut executed = Vec::new();
        for (i, sub) in decision.queries.iter().enumerate() {
            let outcome = self
                .services
                .db
                .safe_execute(&sub.sql, SUBQUERY_TIMEOUT_SECS, cancel)
                .await?;
            if !outcome.success {
                tracing::warn!(index = i, error = ?outcome.error, "sub-query failed, skipping");
                continue;
            }

            let sub_question = if sub.description.is_empty() {
                question.to_string()
            } else {
                sub.description.clone()
            };
            let explain_tool =
                re::explain_results(&self.services, &sub_question, &sub.sql, &outcome, cancel)
                    .await?;
            let parsed: Option<Explanation> = explain_tool
                .data
                .as_ref()
                .and_then(|data| serde_json::from_value(data.clone()).ok());
            result.accumulate_tool(explain_tool);

            if let Some(explanation) = parsed {
                sections.push(format!(
                    "### Part {}: {}\n{}",
                    i + 1,
                    sub.description,
                    explanation.explanation
                ));
                executed.push(json!({
                    "sql": sub.sql,
                    "description": sub.description,
                    "row_count": outcome.row_count,
                }));
            }
        }

        if sections.is_empty() {
            return Ok(None);
        }

        let combined = format!(
            "## Combined analysis of a complex query\n\n{}",
            sections.join("\n\n")
        );
        Ok(Some(json!({
            "explanation": combined,
            "row_count": outcome.row_count,
            "is_sampled": false,
            "is_split": true,
            "split_queries": executed,
        })))
    }
}

fn timed_failure(error: String, start: Instant, partial: AgentResult) -> AgentResult {
    let mut failed = AgentResult::fail(error);
    failed.tool_calls = partial.tool_calls;
    failed.tokens_used = partial.tokens_used;
    failed.execution_time = elapsed_secs(start);
    failed
}
