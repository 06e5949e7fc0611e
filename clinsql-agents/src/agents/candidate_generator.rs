//! Candidate Generator Agent (CG)
//!
//! Generates N candidates, one per strategy, and runs each through the
//! validate / execute / revise loop. Candidates are ordered valid-first,
//! then by strategy preference; that ordering is the documented fallback
//! when the unit tester cannot pick.

use crate::agents::elapsed_secs;
use crate::tools::cg::{self, GeneratedSql};
use crate::tools::ir::EntityMatches;
use crate::Services;
use clinsql_core::{
    sort_candidates, AgentResult, GenerationStrategy, ResultPreview, SqlCandidate,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const MAX_REVISIONS: u32 = 2;
const CANDIDATE_EXECUTE_TIMEOUT_SECS: u64 = 15;

pub struct CandidateGeneratorAgent {
    services: Arc<Services>,
}

impl CandidateGeneratorAgent {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn execute(
        &self,
        question: &str,
        ss_data: &JsonValue,
        ir_data: &JsonValue,
        num_candidates: usize,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let start = Instant::now();
        let mut result = AgentResult::ok(json!(null), "");

        let schema_context = ss_data
            .get("schema_context")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let entities: EntityMatches = ir_data
            .get("entities")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let entity_block = cg::entity_block(&entities);

        let strategies: Vec<GenerationStrategy> = GenerationStrategy::SEQUENCE
            .into_iter()
            .take(num_candidates.clamp(1, GenerationStrategy::SEQUENCE.len()))
            .collect();

        let mut candidates: Vec<SqlCandidate> = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            match self
                .generate_one(
                    question,
                    &schema_context,
                    &entity_block,
                    strategy,
                    &mut result,
                    cancel,
                )
                .await
            {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    let mut failed = AgentResult::fail(e.to_string());
                    failed.execution_time = elapsed_secs(start);
                    failed.tool_calls = result.tool_calls;
                    failed.tokens_used = result.tokens_used;
                    return failed;
                }
            }
        }

        sort_candidates(&mut candidates);
        let valid_count = candidates.iter().filter(|c| c.is_valid).count();

        if candidates.is_empty() {
            let mut failed = AgentResult::fail("no candidates were generated");
            failed.execution_time = elapsed_secs(start);
            failed.tool_calls = result.tool_calls;
            failed.tokens_used = result.tokens_used;
            return failed;
        }

        result.reasoning = format!(
            "Generated {} candidates, {} valid",
            candidates.len(),
            valid_count
        );
        result.data = Some(json!({
            "candidates": candidates,
            "valid_count": valid_count,
            "best_candidate": candidates[0],
        }));
        result.execution_time = elapsed_secs(start);
        result
    }

    /// Generate one candidate and drive it through the validate / execute /
    /// revise loop.
    async fn generate_one(
        &self,
        question: &str,
        schema_context: &str,
        entity_block: &str,
        strategy: GenerationStrategy,
        result: &mut AgentResult,
        cancel: &CancellationToken,
    ) -> clinsql_core::ClinsqlResult<SqlCandidate> {
        let tool = cg::generate_candidate_query(
            &self.services,
            question,
            schema_context,
            entity_block,
            strategy,
            cancel,
        )
        .await?;

        let generated: Option<GeneratedSql> = tool
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok());
        let generation_error = tool.error.clone();
        result.accumulate_tool(tool);

        let Some(generated) = generated else {
            let mut candidate = SqlCandidate::new(strategy, "");
            candidate.error =
                Some(generation_error.unwrap_or_else(|| "generation failed".to_string()));
            return Ok(candidate);
        };

        let mut candidate = SqlCandidate::new(strategy, generated.sql);

        for revision in 0..=MAX_REVISIONS {
            let failure = match self.try_candidate(&mut candidate, cancel).await? {
                None => {
                    candidate.is_valid = true;
                    candidate.error = None;
                    return Ok(candidate);
                }
                Some(failure) => failure,
            };
            candidate.error = Some(failure.clone());

            if revision == MAX_REVISIONS {
                break;
            }

            let revise_tool = cg::revise(
                &self.services,
                question,
                &candidate.sql,
                &failure,
                schema_context,
                strategy,
                cancel,
            )
            .await?;
            let revised: Option<GeneratedSql> = revise_tool
                .data
                .as_ref()
                .and_then(|data| serde_json::from_value(data.clone()).ok());
            result.accumulate_tool(revise_tool);

            match revised {
                Some(revised) => {
                    candidate.sql = revised.sql;
                    candidate.was_revised = true;
                }
                None => break,
            }
        }

        Ok(candidate)
    }

    /// Validate and preview-execute a candidate. Returns `None` on success
    /// or the failure message to feed the revise loop.
    async fn try_candidate(
        &self,
        candidate: &mut SqlCandidate,
        cancel: &CancellationToken,
    ) -> clinsql_core::ClinsqlResult<Option<String>> {
        let validation = self.services.db.validate(&candidate.sql).await?;
        if !validation.valid {
            return Ok(Some(
                validation
                    .error
                    .unwrap_or_else(|| "validation failed".to_string()),
            ));
        }

        let outcome = self
            .services
            .db
            .safe_execute(&candidate.sql, CANDIDATE_EXECUTE_TIMEOUT_SECS, cancel)
            .await?;

        if !outcome.success {
            return Ok(Some(
                outcome
                    .error
                    .unwrap_or_else(|| "execution failed".to_string()),
            ));
        }

        if outcome.row_count == 0 {
            tracing::warn!(
                strategy = candidate.strategy.as_str(),
                "candidate executed but returned no rows"
            );
        }

        candidate.result_preview = Some(ResultPreview {
            columns: outcome.columns,
            row_count: outcome.row_count,
            sample_rows: outcome.data.into_iter().take(3).collect(),
        });
        Ok(None)
    }
}
