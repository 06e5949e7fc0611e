//! Result envelopes
//!
//! Every tool and agent produces the same uniform envelope so downstream
//! stages and the API layer can consume results without knowing which
//! component produced them. Envelope invariant: a failed result carries no
//! data and a non-empty error.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// TOOL RESULT
// ============================================================================

/// Result from a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    pub data: Option<JsonValue>,
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, data: JsonValue) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            data: Some(data),
            error: None,
            tokens_used: 0,
        }
    }

    pub fn fail(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            tokens_used: 0,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

// ============================================================================
// AGENT RESULT
// ============================================================================

/// Standard result from an agent stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub tokens_used: u64,
    /// Elapsed wall-clock seconds for the stage.
    #[serde(default)]
    pub execution_time: f64,
    pub error: Option<String>,
    /// Ordered list of tool invocations made by the agent.
    #[serde(default)]
    pub tool_calls: Vec<ToolResult>,
}

impl AgentResult {
    pub fn ok(data: JsonValue, reasoning: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            reasoning: reasoning.into(),
            tokens_used: 0,
            execution_time: 0.0,
            error: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            reasoning: String::new(),
            tokens_used: 0,
            execution_time: 0.0,
            error: Some(error.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Sum of tool token usage plus any direct usage already recorded.
    pub fn accumulate_tool(&mut self, tool: ToolResult) {
        self.tokens_used += tool.tokens_used;
        self.tool_calls.push(tool);
    }
}

// ============================================================================
// EXECUTION OUTCOME
// ============================================================================

/// Outcome of executing SQL through the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub columns: Vec<String>,
    /// Rows as JSON objects keyed by column name.
    #[serde(default)]
    pub data: Vec<JsonValue>,
    #[serde(default)]
    pub row_count: usize,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            data: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// PIPELINE RESULT
// ============================================================================

/// Result from the complete pipeline, the contract consumed by the
/// HTTP/CLI front-ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PipelineResult {
    pub success: bool,
    pub question: String,
    pub sql: Option<String>,
    pub execution_result: Option<ExecutionOutcome>,
    pub explanation: Option<String>,

    // Agent results for transparency
    pub ir_result: Option<AgentResult>,
    pub ss_result: Option<AgentResult>,
    pub cg_result: Option<AgentResult>,
    pub ut_result: Option<AgentResult>,
    pub re_result: Option<AgentResult>,

    // Metrics
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_time: f64,
    pub error: Option<String>,
}

impl PipelineResult {
    /// Human-readable rendering of the pipeline execution.
    pub fn summary(&self) -> String {
        let bar = "=".repeat(60);
        let mut lines = vec![
            String::new(),
            bar.clone(),
            "CLINSQL Pipeline Result".to_string(),
            bar.clone(),
            format!("Question: {}", self.question),
            format!("Success: {}", self.success),
            String::new(),
        ];

        if let Some(sql) = &self.sql {
            lines.push("Generated SQL:".to_string());
            lines.push(format!("```sql\n{}\n```", sql));
        }

        if let Some(exec) = &self.execution_result {
            lines.push(String::new());
            lines.push("Execution Result:".to_string());
            lines.push(format!("  Rows: {}", exec.row_count));
            if !exec.columns.is_empty() {
                lines.push(format!("  Columns: {}", exec.columns.join(", ")));
            }
        }

        if let Some(explanation) = &self.explanation {
            lines.push(String::new());
            lines.push(bar.clone());
            lines.push("ANSWER:".to_string());
            lines.push(bar.clone());
            lines.push(explanation.clone());
        }

        lines.push(String::new());
        lines.push("Metrics:".to_string());
        lines.push(format!("  Total Tokens: {}", self.total_tokens));
        lines.push(format!("  Total Time: {:.2}s", self.total_time));

        for (name, result) in [
            ("IR", &self.ir_result),
            ("SS", &self.ss_result),
            ("CG", &self.cg_result),
            ("UT", &self.ut_result),
            ("RE", &self.re_result),
        ] {
            if let Some(r) = result {
                lines.push(format!(
                    "  {} Agent: {:.2}s, {} tokens",
                    name, r.execution_time, r.tokens_used
                ));
            }
        }

        if let Some(error) = &self.error {
            lines.push(String::new());
            lines.push(format!("Error: {}", error));
        }

        lines.push(bar);
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_tool_result_has_no_data_and_an_error() {
        let result = ToolResult::fail("extract_keywords", "provider returned nothing");
        assert!(!result.success);
        assert!(result.data.is_none());
        assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
    }

    #[test]
    fn test_agent_result_accumulates_tool_tokens() {
        let mut agent = AgentResult::ok(json!({}), "done");
        agent.accumulate_tool(ToolResult::ok("a", json!(1)).with_tokens(10));
        agent.accumulate_tool(ToolResult::ok("b", json!(2)).with_tokens(32));
        assert_eq!(agent.tokens_used, 42);
        assert_eq!(agent.tool_calls.len(), 2);
        assert_eq!(agent.tool_calls[0].tool_name, "a");
    }

    #[test]
    fn test_pipeline_result_round_trips_through_json() {
        let result = PipelineResult {
            success: true,
            question: "How many studies?".to_string(),
            sql: Some("SELECT COUNT(*) FROM _studies;".to_string()),
            execution_result: Some(ExecutionOutcome {
                success: true,
                columns: vec!["count".to_string()],
                data: vec![json!({"count": 12})],
                row_count: 1,
                error: None,
            }),
            total_tokens: 1234,
            ..Default::default()
        };
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: PipelineResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn test_summary_mentions_sql_and_metrics() {
        let result = PipelineResult {
            success: true,
            question: "q".to_string(),
            sql: Some("SELECT 1;".to_string()),
            total_tokens: 7,
            ..Default::default()
        };
        let text = result.summary();
        assert!(text.contains("SELECT 1;"));
        assert!(text.contains("Total Tokens: 7"));
    }
}
