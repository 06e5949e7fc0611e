//! Unit Tester tools: generate_unit_test, evaluate
//!
//! A unit test here is a natural-language assertion about what a correct
//! answer must do; it is judged by an LLM against the candidates' SQL and
//! execution previews, not by running anything.

use crate::prompts;
use crate::tools::tool_llm_call;
use crate::Services;
use clinsql_core::{ClinsqlResult, SqlCandidate, ToolResult};
use clinsql_llm::{extract_json, ChatMessage, ChatRequest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Kind of discriminating assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Columns,
    Aggregation,
    Filter,
    Join,
    ResultType,
}

/// One generated unit test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTest {
    pub description: String,
    pub expected_behavior: String,
    pub test_type: TestType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UnitTests {
    pub tests: Vec<UnitTest>,
}

/// Verdict of one candidate against one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateVerdict {
    pub candidate: usize,
    pub passes: bool,
    #[serde(default)]
    pub reasoning: String,
}

/// Full evaluation of one test across all candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Evaluation {
    pub results: Vec<CandidateVerdict>,
    pub best_candidate: Option<usize>,
}

/// Render the candidates (SQL plus execution preview) for the prompts.
pub fn render_candidates(candidates: &[&SqlCandidate]) -> String {
    let mut lines = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        lines.push(format!(
            "### Candidate {} ({}):\n```sql\n{}\n```",
            i,
            candidate.strategy.as_str(),
            candidate.sql
        ));
        if let Some(preview) = &candidate.result_preview {
            lines.push(format!(
                "Preview: columns [{}], {} rows",
                preview.columns.join(", "),
                preview.row_count
            ));
        }
    }
    lines.join("\n")
}

/// Generate `num_tests` discriminating unit tests in one JSON LLM call.
pub async fn generate_unit_test(
    services: &Services,
    question: &str,
    candidates: &[&SqlCandidate],
    num_tests: usize,
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let request = ChatRequest::new(
        services.config.models.evaluator.clone(),
        vec![
            ChatMessage::system(prompts::GENERATE_UNIT_TESTS_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::GENERATE_UNIT_TESTS_USER,
                &[
                    ("question", question),
                    ("candidates", &render_candidates(candidates)),
                    ("num_tests", &num_tests.to_string()),
                ],
            )),
        ],
    )
    .with_temperature(services.config.agent.temperature)
    .with_max_tokens(1536)
    .with_json_mode(true);

    let response = tool_llm_call(services, &request, cancel).await?;
    let tokens = response.usage.total();

    let Some(value) = response.content.as_deref().and_then(extract_json) else {
        return Ok(
            ToolResult::fail("generate_unit_test", "no usable JSON in model response")
                .with_tokens(tokens),
        );
    };

    let mut tests = Vec::new();
    if let Some(items) = value.get("tests").and_then(|v| v.as_array()) {
        for item in items.iter().take(num_tests) {
            let Some(description) = item.get("description").and_then(|v| v.as_str()) else {
                continue;
            };
            let test_type = match item.get("test_type").and_then(|v| v.as_str()) {
                Some("aggregation") => TestType::Aggregation,
                Some("filter") => TestType::Filter,
                Some("join") => TestType::Join,
                Some("result_type") => TestType::ResultType,
                _ => TestType::Columns,
            };
            tests.push(UnitTest {
                description: description.to_string(),
                expected_behavior: item
                    .get("expected_behavior")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                test_type,
            });
        }
    }

    if tests.is_empty() {
        return Ok(
            ToolResult::fail("generate_unit_test", "model produced no tests").with_tokens(tokens),
        );
    }

    let payload = UnitTests { tests };
    Ok(ToolResult::ok("generate_unit_test", serde_json::to_value(&payload)?).with_tokens(tokens))
}

/// Judge every candidate against one unit test.
pub async fn evaluate(
    services: &Services,
    question: &str,
    test: &UnitTest,
    candidates: &[&SqlCandidate],
    cancel: &CancellationToken,
) -> ClinsqlResult<ToolResult> {
    let test_text = format!(
        "{} (expected: {}; type: {:?})",
        test.description, test.expected_behavior, test.test_type
    );

    let request = ChatRequest::new(
        services.config.models.evaluator.clone(),
        vec![
            ChatMessage::system(prompts::EVALUATE_TEST_SYSTEM),
            ChatMessage::user(prompts::fill(
                prompts::EVALUATE_TEST_USER,
                &[
                    ("question", question),
                    ("test", &test_text),
                    ("candidates", &render_candidates(candidates)),
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
            ToolResult::fail("evaluate", "no usable JSON in model response").with_tokens(tokens),
        );
    };

    let mut results = Vec::new();
    if let Some(items) = value.get("results").and_then(|v| v.as_array()) {
        for item in items {
            let Some(candidate) = item.get("candidate").and_then(|v| v.as_u64()) else {
                continue;
            };
            let candidate = candidate as usize;
            if candidate >= candidates.len() {
                continue;
            }
            results.push(CandidateVerdict {
                candidate,
                passes: item.get("passes").and_then(|v| v.as_bool()).unwrap_or(false),
                reasoning: item
                    .get("reasoning")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            });
        }
    }

    if results.is_empty() {
        return Ok(
            ToolResult::fail("evaluate", "model judged no candidates").with_tokens(tokens),
        );
    }

    let best_candidate = value
        .get("best_candidate")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .filter(|&v| v < candidates.len());

    let payload = Evaluation {
        results,
        best_candidate,
    };
    Ok(ToolResult::ok("evaluate", serde_json::to_value(&payload)?).with_tokens(tokens))
}
