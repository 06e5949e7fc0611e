//! Candidate Generator tools: generate_candidate_query, revise

use crate::prompts;
use crate::tools::tool_llm_call;
use crate::Services;
use clinsql_core::{ClinsqlResult, GenerationStrategy, ToolResult};
use clinsql_llm::{extract_sql, ChatMessage, ChatRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Payload of a successful generation or revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub strategy: GenerationStrategy,
}

/// Render the `ENTITY MATCHES FROM DATABASE` block from IR entity matches,
/// or an empty string when there are none.
pub fn entity_block(matches: &crate::tools::ir::EntityMatches) -> String {
    if matches.matches.is_empty() {
        return String::new();
    }
    let mut lines = vec!["\n## ENTITY MATCHES FROM DATABASE:".to_string()];
    for (keyword, hits) in &matches.matches {
        for hit in hits.iter().take(3) {
            lines.push(format!(
                "- '{}' matches value '{}' in {}.{}",
                keyword, hit.value, hit.table, hit.column
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn strategy_template(strategy: GenerationStrategy) -> &'static str {
    match strategy {
        GenerationStrategy::Standard => prompts::DIRECT_SQL_PROMPT,
        GenerationStrategy::Cot => prompts::COT_SQL_PROMPT,
        GenerationStrategy::Decomposition => prompts::DECOMPOSITION_SQL_PROMPT,
    }
}

/// Generate one candidate with the given strategy's template and
/// temperature. Fails when no SQL can be extracted from the response.
pub async fn generate_candidate_query(
    services: &Services,
    question: &str,
    schema_context: &str,
    entities: &str,
    strategy: GenerationStrategy,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let request = ChatRequest::new(
        services.config.models.sql_generator.clone(),
        vec![
            ChatMessage::system(prompts::GENERATOR_SYSTEM_PROMPT),
            ChatMessage::user(prompts::fill(
                strategy_template(strategy),
                &[
                    ("schema_context", schema_context),
                    ("entity_block", entities),
                    ("question", question),
                ],
            )),
        ],
    )
    .with_temperature(strategy.temperature())
    .with_max_tokens(2048);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    match response.content.as_deref().and_then(extract_sql) {
        Some(sql) => {
            let payload = GeneratedSql { sql, strategy };
            Ok(ToolResult::ok("generate_candidate_query", serde_json::to_value(&payload)?)
                .with_tokens(tokens))
        }
        None => Ok(ToolResult::fail(
            "generate_candidate_query",
            format!(
                "could not extract SQL from {} response",
                strategy.as_str()
            ),
        )
        .with_tokens(tokens)),
    }
}

/// Repair a faulty query given the execution error. One LLM call; fails
/// when no corrected SQL can be extracted.
pub async fn revise(
    services: &Services,
    question: &str,
    faulty_sql: &str,
    error: &str,
    schema_context: &str,
    strategy: GenerationStrategy,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let request = ChatRequest::new(
        services.config.models.sql_refiner.clone(),
        vec![
            ChatMessage::system(prompts::GENERATOR_SYSTEM_PROMPT),
            ChatMessage::user(prompts::fill(
                prompts::REVISE_PROMPT,
                &[
                    ("question", question),
                    ("sql", faulty_sql),
                    ("error", error),
                    ("schema_context", schema_context),
                ],
            )),
        ],
    )
    .with_temperature(services.config.agent.temperature)
    .with_max_tokens(2048);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    match response.content.as_deref().and_then(extract_sql) {
        Some(sql) => {
            let payload = GeneratedSql { sql, strategy };
            Ok(ToolResult::ok("revise", serde_json::to_value(&payload)?).with_tokens(tokens))
        }
        None => Ok(
            ToolResult::fail("revise", "could not extract corrected SQL from response")
                .with_tokens(tokens),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ir::EntityMatches;
    use clinsql_core::EntityMatch;

    #[test]
    fn test_entity_block_empty_for_no_matches() {
        assert_eq!(entity_block(&EntityMatches::default()), "");
    }

    #[test]
    fn test_entity_block_lists_matches_per_keyword() {
        let mut matches = EntityMatches::default();
        matches.matches.insert(
            "site 18".to_string(),
            vec![EntityMatch {
                value: "Site 18".to_string(),
                table: "sites".to_string(),
                column: "site_number".to_string(),
                score: 0.97,
            }],
        );
        let block = entity_block(&matches);
        assert!(block.contains("ENTITY MATCHES FROM DATABASE"));
        assert!(block.contains("'site 18' matches value 'Site 18' in sites.site_number"));
    }

    #[test]
    fn test_entity_block_caps_hits_per_keyword() {
        let mut matches = EntityMatches::default();
        matches.matches.insert(
            "status".to_string(),
            (0..6)
                .map(|i| EntityMatch {
                    value: format!("STATUS_{}", i),
                    table: "subjects".to_string(),
                    column: "status".to_string(),
                    score: 0.5,
                })
                .collect(),
        );
        let block = entity_block(&matches);
        assert_eq!(block.matches("matches value").count(), 3);
    }
}
