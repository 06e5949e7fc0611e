//! Behavior tests for the agent layer, driven by a scripted chat provider
//! so nothing touches the network or the database.

use async_trait::async_trait;
use clinsql_agents::{
    InformationRetrieverAgent, Pipeline, ResultExplainerAgent, RunOptions, SchemaSelectorAgent,
    Services, UnitTesterAgent,
};
use clinsql_catalog::SchemaCatalog;
use clinsql_core::{
    ClinsqlResult, ColumnInfo, ExecutionOutcome, GenerationStrategy, PipelineConfig, SqlCandidate,
    TableInfo,
};
use clinsql_db::DbClient;
use clinsql_index::{DocKind, FeatureEmbedder, IndexedValue, Preprocessor, SchemaDoc};
use clinsql_llm::{ChatProvider, ChatRequest, ChatResponse, LlmGateway, TokenUsage};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// SCRIPTED PROVIDER
// ============================================================================

struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
    calls: AtomicU64,
}

impl ScriptedProvider {
    fn new(mut responses: Vec<String>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            calls: AtomicU64::new(0),
        }
    }

    fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(&self, request: &ChatRequest) -> ClinsqlResult<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop();
        Ok(ChatResponse {
            content: next,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 10,
            },
            model: request.model.clone(),
            error: None,
        })
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

fn table(name: &str, columns: &[(&str, &str)], category: &str) -> TableInfo {
    TableInfo {
        name: name.to_string(),
        columns: columns
            .iter()
            .map(|(col, ty)| ColumnInfo::new(*col, *ty, true))
            .collect(),
        row_count: 100,
        primary_keys: vec![],
        foreign_keys: vec![],
        category: category.to_string(),
        study_number: "10".to_string(),
        description: String::new(),
    }
}

fn make_catalog() -> SchemaCatalog {
    SchemaCatalog::from_tables(vec![
        table("adverse_events", &[("ae_id", "integer")], "safety"),
        table("coding_records", &[("record_id", "integer")], "coding"),
        table(
            "data_queries",
            &[
                ("query_id", "integer"),
                ("subject_id", "integer"),
                ("query_status", "text"),
                ("days_open", "integer"),
            ],
            "query",
        ),
        table(
            "sites",
            &[("site_id", "integer"), ("site_number", "text"), ("country", "text")],
            "enrollment",
        ),
        table(
            "subjects",
            &[("subject_id", "integer"), ("site_id", "integer"), ("status", "text")],
            "enrollment",
        ),
        table("visits", &[("visit_id", "integer")], "visit"),
    ])
}

fn make_preprocessor() -> Preprocessor {
    let mut preprocessor = Preprocessor::new(Arc::new(FeatureEmbedder));
    for (value, table, column) in [
        ("Site 18", "sites", "site_number"),
        ("Site 21", "sites", "site_number"),
        ("JPN", "sites", "country"),
        ("OPEN", "data_queries", "query_status"),
    ] {
        preprocessor.add_value(IndexedValue {
            value: value.to_string(),
            table: table.to_string(),
            column: column.to_string(),
        });
    }
    preprocessor.add_document(SchemaDoc {
        kind: DocKind::Column,
        table: "data_queries".to_string(),
        column: Some("days_open".to_string()),
        text: "data_queries days_open Days Open".to_string(),
    });
    preprocessor
}

fn make_services(provider: Arc<ScriptedProvider>) -> Arc<Services> {
    let config = PipelineConfig {
        api_key: "test-key".to_string(),
        ..Default::default()
    };
    let db = DbClient::connect(&config.database, config.row_cap).expect("pool config");
    Arc::new(Services::new(
        Arc::new(LlmGateway::new(provider)),
        db,
        Arc::new(make_catalog()),
        Arc::new(make_preprocessor()),
        Arc::new(config),
    ))
}

fn candidate(strategy: GenerationStrategy, sql: &str, valid: bool) -> SqlCandidate {
    let mut candidate = SqlCandidate::new(strategy, sql);
    candidate.is_valid = valid;
    if !valid {
        candidate.error = Some("syntax error".to_string());
    }
    candidate
}

// ============================================================================
// UNIT TESTER
// ============================================================================

#[tokio::test]
async fn ut_returns_first_candidate_when_none_valid() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let agent = UnitTesterAgent::new(make_services(provider.clone()));

    let candidates = vec![
        candidate(GenerationStrategy::Standard, "SELECT broken", false),
        candidate(GenerationStrategy::Cot, "SELECT also broken", false),
    ];
    let result = agent
        .execute("q", &candidates, 5, &CancellationToken::new())
        .await;

    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(data["selection_method"], "best_effort");
    assert_eq!(data["selected_sql"], "SELECT broken");
    // Short-circuit makes no model calls.
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn ut_short_circuits_on_single_valid_candidate() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let agent = UnitTesterAgent::new(make_services(provider.clone()));

    let candidates = vec![
        candidate(GenerationStrategy::Standard, "SELECT broken", false),
        candidate(GenerationStrategy::Cot, "SELECT COUNT(*) FROM subjects;", true),
    ];
    let result = agent
        .execute("how many subjects", &candidates, 5, &CancellationToken::new())
        .await;

    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(data["selection_method"], "single_valid");
    assert_eq!(data["selected_sql"], "SELECT COUNT(*) FROM subjects;");
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn ut_votes_and_then_serves_repeat_calls_from_cache() {
    let tests_json = json!({
        "tests": [
            {"description": "returns one integer column", "expected_behavior": "single count", "test_type": "result_type"},
            {"description": "filters to open queries", "expected_behavior": "WHERE query_status = 'OPEN'", "test_type": "filter"},
        ]
    })
    .to_string();
    let evaluation_json = json!({
        "results": [
            {"candidate": 0, "passes": false, "reasoning": "missing filter"},
            {"candidate": 1, "passes": true, "reasoning": "correct"},
        ],
        "best_candidate": 1
    })
    .to_string();

    let provider = Arc::new(ScriptedProvider::new(vec![
        tests_json,
        evaluation_json.clone(),
        evaluation_json,
    ]));
    let agent = UnitTesterAgent::new(make_services(provider.clone()));

    let candidates = vec![
        candidate(GenerationStrategy::Standard, "SELECT COUNT(*) FROM data_queries;", true),
        candidate(
            GenerationStrategy::Cot,
            "SELECT COUNT(*) FROM data_queries WHERE query_status = 'OPEN';",
            true,
        ),
    ];

    let first = agent
        .execute("how many open queries", &candidates, 2, &CancellationToken::new())
        .await;
    assert!(first.success);
    let first_data = first.data.unwrap();
    assert_eq!(first_data["selection_method"], "unit_test_vote");
    assert_eq!(first_data["selected_index"], 1);
    assert_eq!(first_data["scores"], json!([0, 2]));
    assert_eq!(first_data["max_score"], 2);
    let calls_after_first = provider.call_count();
    assert_eq!(calls_after_first, 3);

    // Identical inputs: served from cache, no further model calls.
    let second = agent
        .execute("how many open queries", &candidates, 2, &CancellationToken::new())
        .await;
    assert!(second.success);
    assert_eq!(second.data.unwrap()["selected_index"], 1);
    assert_eq!(provider.call_count(), calls_after_first);
}

#[tokio::test]
async fn ut_cache_normalizes_question_whitespace() {
    let tests_json = json!({
        "tests": [{"description": "d", "expected_behavior": "e", "test_type": "columns"}]
    })
    .to_string();
    let evaluation_json = json!({
        "results": [{"candidate": 0, "passes": true}, {"candidate": 1, "passes": false}],
        "best_candidate": 0
    })
    .to_string();
    let provider = Arc::new(ScriptedProvider::new(vec![tests_json, evaluation_json]));
    let agent = UnitTesterAgent::new(make_services(provider.clone()));

    let candidates = vec![
        candidate(GenerationStrategy::Standard, "SELECT 1;", true),
        candidate(GenerationStrategy::Cot, "SELECT 2;", true),
    ];

    let _ = agent
        .execute("How many  Studies", &candidates, 1, &CancellationToken::new())
        .await;
    let calls = provider.call_count();
    let again = agent
        .execute("  how many studies ", &candidates, 1, &CancellationToken::new())
        .await;
    assert!(again.success);
    assert_eq!(provider.call_count(), calls);
}

// ============================================================================
// INFORMATION RETRIEVER
// ============================================================================

#[tokio::test]
async fn ir_falls_back_to_whitespace_keywords_on_garbage_response() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "I am sorry, I cannot produce JSON today.".to_string(),
    ]));
    let agent = InformationRetrieverAgent::new(make_services(provider.clone()));

    let result = agent
        .execute("Show patients from JPN with open queries", &CancellationToken::new())
        .await;

    assert!(result.success);
    let data = result.data.unwrap();
    let keywords: Vec<String> =
        serde_json::from_value(data["keywords"]["keywords"].clone()).unwrap();
    assert!(keywords.contains(&"jpn".to_string()));
    assert!(keywords.contains(&"patients".to_string()));
    // The LSH index resolves the country literal, pulling `sites` in.
    let tables: Vec<String> = serde_json::from_value(data["relevant_tables"].clone()).unwrap();
    assert!(tables.contains(&"sites".to_string()));
    assert!(tables.contains(&"data_queries".to_string()));
}

#[tokio::test]
async fn ir_forces_metadata_tables_for_database_questions() {
    let mut tables = vec![table("_studies", &[("study_number", "text")], "metadata")];
    tables.push(table("sites", &[("site_id", "integer")], "enrollment"));
    let catalog = SchemaCatalog::from_tables(tables);

    let provider = Arc::new(ScriptedProvider::new(vec![json!({
        "keywords": ["studies"], "entities": [], "clinical_terms": [], "filters": []
    })
    .to_string()]));
    let config = PipelineConfig {
        api_key: "test-key".to_string(),
        ..Default::default()
    };
    let db = DbClient::connect(&config.database, config.row_cap).unwrap();
    let services = Arc::new(Services::new(
        Arc::new(LlmGateway::new(provider)),
        db,
        Arc::new(catalog),
        Arc::new(make_preprocessor()),
        Arc::new(config),
    ));
    let agent = InformationRetrieverAgent::new(services);

    let result = agent
        .execute("How many studies are in the database?", &CancellationToken::new())
        .await;

    assert!(result.success);
    let tables: Vec<String> =
        serde_json::from_value(result.data.unwrap()["relevant_tables"].clone()).unwrap();
    assert_eq!(tables.first().map(String::as_str), Some("_studies"));
}

// ============================================================================
// SCHEMA SELECTOR
// ============================================================================

#[tokio::test]
async fn ss_falls_back_to_first_five_catalog_tables() {
    // Garbage for select_tables, then garbage for each of the five
    // column-selection calls (which keep all columns).
    let provider = Arc::new(ScriptedProvider::new(vec![
        "not json".to_string(),
        "not json".to_string(),
        "not json".to_string(),
        "not json".to_string(),
        "not json".to_string(),
        "not json".to_string(),
    ]));
    let agent = SchemaSelectorAgent::new(make_services(provider.clone()));

    let ir_data = json!({
        "keywords": {"keywords": [], "entities": [], "clinical_terms": [], "filters": []},
        "relevant_tables": [],
    });
    let result = agent
        .execute("anything", &ir_data, &CancellationToken::new())
        .await;

    assert!(result.success);
    let data = result.data.unwrap();
    let selected: Vec<String> = data["selected_tables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["table"].as_str().unwrap().to_string())
        .collect();
    // First five catalog tables in sorted order.
    assert_eq!(
        selected,
        vec!["adverse_events", "coding_records", "data_queries", "sites", "subjects"]
    );
    // Every selected table's columns are a subset of the catalog's.
    let schema_context = data["schema_context"].as_str().unwrap();
    assert!(schema_context.contains("CREATE TABLE") || schema_context.contains("["));
}

#[tokio::test]
async fn ss_keeps_only_tables_known_to_the_catalog() {
    let selection = json!({
        "tables": [
            {"table": "sites", "role": "primary", "reason": "holds site data"},
            {"table": "hallucinated_table", "role": "join", "reason": "does not exist"},
        ],
        "join_hints": []
    })
    .to_string();
    // One column-selection response for the single kept table.
    let columns = json!({"columns": [{"name": "site_number", "role": "SELECT"}]}).to_string();
    let provider = Arc::new(ScriptedProvider::new(vec![selection, columns]));
    let agent = SchemaSelectorAgent::new(make_services(provider));

    let ir_data = json!({
        "keywords": {"keywords": ["sites"], "entities": [], "clinical_terms": [], "filters": []},
        "relevant_tables": ["sites"],
    });
    let result = agent
        .execute("list sites", &ir_data, &CancellationToken::new())
        .await;

    assert!(result.success);
    let data = result.data.unwrap();
    let selected = data["selected_tables"].as_array().unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0]["table"], "sites");
    assert_eq!(data["primary_table"], "sites");
}

#[tokio::test]
async fn ss_filter_column_flags_columns_named_in_the_question() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let services = make_services(provider);

    let tool = clinsql_agents::tools::ss::filter_column(
        &services,
        "average days open for queries",
        "data_queries",
    )
    .unwrap();
    assert!(tool.success);

    let verdicts: Vec<clinsql_agents::tools::ss::ColumnRelevance> =
        serde_json::from_value(tool.data.unwrap()).unwrap();
    let days_open = verdicts.iter().find(|v| v.column == "days_open").unwrap();
    assert!(days_open.relevant);
    let query_id = verdicts.iter().find(|v| v.column == "query_id").unwrap();
    assert!(query_id.relevant); // "queries" overlaps the query_ prefix
}

// ============================================================================
// RESULT EXPLAINER
// ============================================================================

#[tokio::test]
async fn re_empty_result_takes_the_no_llm_branch() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let agent = ResultExplainerAgent::new(make_services(provider.clone()));

    let outcome = ExecutionOutcome {
        success: true,
        columns: vec!["count".to_string()],
        data: vec![],
        row_count: 0,
        error: None,
    };
    let result = agent
        .execute(
            "sites with no enrollments",
            "SELECT * FROM sites WHERE 1=0",
            &outcome,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(data["row_count"], 0);
    assert_eq!(data["is_split"], false);
    assert!(data["explanation"]
        .as_str()
        .unwrap()
        .contains("returned no rows"));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn re_large_result_is_sampled_and_carries_statistics() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        "Most queries are open and average 31 days.".to_string(),
    ]));
    let agent = ResultExplainerAgent::new(make_services(provider.clone()));

    let data: Vec<serde_json::Value> = (0..60)
        .map(|i| json!({"days_open": i, "query_status": if i % 2 == 0 { "OPEN" } else { "CLOSED" }}))
        .collect();
    let outcome = ExecutionOutcome {
        success: true,
        columns: vec!["days_open".to_string(), "query_status".to_string()],
        row_count: data.len(),
        data,
        error: None,
    };

    let result = agent
        .execute(
            "everything about queries",
            "SELECT days_open, query_status FROM data_queries",
            &outcome,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    let payload = result.data.unwrap();
    assert_eq!(payload["is_sampled"], true);
    assert_eq!(payload["row_count"], 60);
    assert_eq!(payload["statistics"]["days_open"]["kind"], "numeric");
    assert_eq!(provider.call_count(), 1);
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

#[tokio::test]
async fn pipeline_reports_ir_failure_as_fatal_on_cancellation() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let pipeline = Pipeline::from_services(make_services(provider.clone()));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pipeline
        .run("How many studies?", RunOptions::default(), &cancel)
        .await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("IR agent failed"));
    assert!(result.sql.is_none());
    assert_eq!(provider.call_count(), 0);
}

#[test]
fn run_options_defaults_match_contract() {
    let options = RunOptions::default();
    assert_eq!(options.num_candidates, 3);
    assert_eq!(options.num_unit_tests, 5);
    assert!(!options.disable_unit_test);
    assert!(options.execute);
    assert!(options.explain);
}

#[tokio::test]
async fn re_split_decision_false_keeps_query_whole() {
    // Splitter answers should_split=false; the small-result explainer runs next.
    let split = json!({"should_split": false, "queries": []}).to_string();
    let provider = Arc::new(ScriptedProvider::new(vec![
        split,
        "Two subjects matched.".to_string(),
    ]));
    let agent = ResultExplainerAgent::new(make_services(provider.clone()));

    let outcome = ExecutionOutcome {
        success: true,
        columns: vec!["subject_id".to_string()],
        data: vec![json!({"subject_id": 1}), json!({"subject_id": 2})],
        row_count: 2,
        error: None,
    };
    let result = agent
        .execute(
            "subjects with open queries at site 18",
            "SELECT s.subject_id FROM subjects s JOIN sites st ON s.site_id = st.site_id JOIN data_queries q ON q.subject_id = s.subject_id",
            &outcome,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(data["is_split"], false);
    assert_eq!(data["explanation"], "Two subjects matched.");
    assert_eq!(provider.call_count(), 2);
}
