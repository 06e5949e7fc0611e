//! Unit Tester Agent (UT)
//!
//! Selects among candidate queries by generating natural-language unit
//! tests and voting candidates through them. Evaluations run on a bounded
//! worker pool feeding a results channel; the coordinator alone reduces
//! into the score vector. Results are memoized so a repeated call with the
//! same inputs returns instantly.

use crate::agents::elapsed_secs;
use crate::tools::ut::{self, Evaluation, UnitTests};
use crate::Services;
use clinsql_core::{AgentResult, SqlCandidate, ToolResult};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Copy-on-write memo of previous selections. Readers clone the Arc and
/// never observe a partially populated entry.
type SelectionCache = RwLock<Arc<HashMap<String, JsonValue>>>;

pub struct UnitTesterAgent {
    services: Arc<Services>,
    cache: SelectionCache,
}

impl UnitTesterAgent {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            cache: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub async fn execute(
        &self,
        question: &str,
        candidates: &[SqlCandidate],
        num_tests: usize,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let start = Instant::now();

        if candidates.is_empty() {
            return AgentResult::fail("no candidates to select from");
        }

        let valid: Vec<SqlCandidate> =
            candidates.iter().filter(|c| c.is_valid).cloned().collect();

        // Short-circuits: nothing to vote on.
        if valid.is_empty() {
            let mut result = AgentResult::ok(
                selection_data(&candidates[0], 0, "best_effort", &[], None, None),
                "No valid candidates; returning the first candidate unchanged",
            );
            result.execution_time = elapsed_secs(start);
            return result;
        }
        if valid.len() == 1 {
            let mut result = AgentResult::ok(
                selection_data(&valid[0], 0, "single_valid", &[], None, None),
                "Single valid candidate selected without testing",
            );
            result.execution_time = elapsed_secs(start);
            return result;
        }

        let cache_key = cache_key(question, &valid, num_tests);
        if let Some(cached) = self.cache_get(&cache_key) {
            let mut result = AgentResult::ok(cached, "Selection served from cache");
            result.execution_time = elapsed_secs(start);
            return result;
        }

        let mut result = AgentResult::ok(json!(null), "");

        // Generate the unit tests.
        let valid_refs: Vec<&SqlCandidate> = valid.iter().collect();
        let tests_tool = match ut::generate_unit_test(
            &self.services,
            question,
            &valid_refs,
            num_tests,
            cancel,
        )
        .await
        {
            Ok(tool) => tool,
            Err(e) => return timed_failure(e.to_string(), start),
        };
        let tests: Option<UnitTests> = tests_tool
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok());
        let generation_error = tests_tool.error.clone();
        result.accumulate_tool(tests_tool);

        let Some(tests) = tests else {
            let mut failed = AgentResult::fail(
                generation_error.unwrap_or_else(|| "unit test generation failed".to_string()),
            );
            failed.tool_calls = result.tool_calls;
            failed.tokens_used = result.tokens_used;
            failed.execution_time = elapsed_secs(start);
            return failed;
        };

        // Evaluate every test in parallel and reduce in the coordinator.
        let evaluations = self
            .evaluate_parallel(question, &tests, Arc::new(valid.clone()), cancel)
            .await;

        let mut scores = vec![0usize; valid.len()];
        let mut evaluation_payloads = Vec::with_capacity(evaluations.len());
        for (test_idx, tool) in evaluations {
            if let Some(parsed) = tool
                .data
                .as_ref()
                .and_then(|data| serde_json::from_value::<Evaluation>(data.clone()).ok())
            {
                for verdict in &parsed.results {
                    if verdict.passes && verdict.candidate < scores.len() {
                        scores[verdict.candidate] += 1;
                    }
                }
                evaluation_payloads.push(json!({
                    "test": tests.tests.get(test_idx),
                    "evaluation": parsed,
                }));
            }
            result.accumulate_tool(tool);
        }

        // Max score wins; ties resolve to the earliest candidate, which
        // already reflects strategy preference.
        let max_score = scores.iter().copied().max().unwrap_or(0);
        let selected_idx = scores
            .iter()
            .position(|&s| s == max_score)
            .unwrap_or(0);

        let data = selection_data(
            &valid[selected_idx],
            selected_idx,
            "unit_test_vote",
            &scores,
            Some(&tests),
            Some(&evaluation_payloads),
        );
        self.cache_put(cache_key, data.clone());

        result.reasoning = format!(
            "Candidate {} won with {}/{} tests passed",
            selected_idx,
            max_score,
            tests.tests.len()
        );
        result.data = Some(data);
        result.execution_time = elapsed_secs(start);
        result
    }

    /// Run the per-test evaluations on a worker pool of size
    /// min(4, #tests). Workers send into a results channel and never touch
    /// the score map; a worker that observes cancellation exits before its
    /// LLM call.
    async fn evaluate_parallel(
        &self,
        question: &str,
        tests: &UnitTests,
        valid: Arc<Vec<SqlCandidate>>,
        cancel: &CancellationToken,
    ) -> Vec<(usize, ToolResult)> {
        let worker_count = tests.tests.len().min(4).max(1);
        let permits = Arc::new(Semaphore::new(worker_count));
        let (results_tx, mut results_rx) = mpsc::channel(tests.tests.len().max(1));

        let mut handles = Vec::with_capacity(tests.tests.len());
        for (test_idx, test) in tests.tests.iter().cloned().enumerate() {
            let services = self.services.clone();
            let question = question.to_string();
            let valid = valid.clone();
            let permits = permits.clone();
            let results_tx = results_tx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                let candidate_refs: Vec<&SqlCandidate> = valid.iter().collect();
                let outcome =
                    ut::evaluate(&services, &question, &test, &candidate_refs, &cancel).await;
                let tool = outcome.unwrap_or_else(|e| ToolResult::fail("evaluate", e.to_string()));
                let _ = results_tx.send((test_idx, tool)).await;
            }));
        }
        drop(results_tx);

        let mut evaluations = Vec::with_capacity(tests.tests.len());
        while let Some(entry) = results_rx.recv().await {
            evaluations.push(entry);
        }
        for handle in handles {
            let _ = handle.await;
        }

        evaluations.sort_by_key(|(test_idx, _)| *test_idx);
        evaluations
    }

    fn cache_get(&self, key: &str) -> Option<JsonValue> {
        let snapshot = match self.cache.read() {
            Ok(guard) => guard.clone(),
            Err(_) => return None,
        };
        snapshot.get(key).cloned()
    }

    fn cache_put(&self, key: String, value: JsonValue) {
        if let Ok(mut guard) = self.cache.write() {
            let mut next = (**guard).clone();
            next.insert(key, value);
            *guard = Arc::new(next);
        }
    }
}

/// Memo key: normalized question, a canonical hash of the valid
/// candidates, and the test count.
fn cache_key(question: &str, valid: &[SqlCandidate], num_tests: usize) -> String {
    let normalized = question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

    let canonical: Vec<(&str, &str)> = valid
        .iter()
        .map(|c| (c.strategy.as_str(), c.sql.as_str()))
        .collect();
    let canonical =
        serde_json::to_string(&canonical).unwrap_or_else(|_| format!("{} candidates", valid.len()));

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hasher.update([0u8]);
    hasher.update(num_tests.to_le_bytes());
    hex::encode(hasher.finalize())
}

fn selection_data(
    selected: &SqlCandidate,
    selected_idx: usize,
    method: &str,
    scores: &[usize],
    tests: Option<&UnitTests>,
    evaluations: Option<&Vec<JsonValue>>,
) -> JsonValue {
    json!({
        "selected_sql": selected.sql,
        "selected_candidate": selected,
        "selected_index": selected_idx,
        "selection_method": method,
        "scores": scores,
        "max_score": scores.iter().copied().max().unwrap_or(0),
        "unit_tests": tests,
        "evaluations": evaluations,
    })
}

fn timed_failure(error: String, start: Instant) -> AgentResult {
    let mut failed = AgentResult::fail(error);
    failed.execution_time = elapsed_secs(start);
    failed
}
