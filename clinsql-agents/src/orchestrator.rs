//! Pipeline orchestrator
//!
//! Runs the five agents in sequence with the documented fallback policy:
//! IR and SS failures are fatal, CG must produce at least one candidate,
//! a UT failure falls back to CG's best candidate, and execution and
//! explanation are optional and never fatal.

use crate::agents::{
    CandidateGeneratorAgent, InformationRetrieverAgent, ResultExplainerAgent, SchemaSelectorAgent,
    UnitTesterAgent,
};
use crate::Services;
use clinsql_catalog::SchemaCatalog;
use clinsql_core::{
    ClinsqlResult, ExecutionOutcome, PipelineConfig, PipelineResult, SqlCandidate,
};
use clinsql_db::DbClient;
use clinsql_index::{FeatureEmbedder, Preprocessor};
use clinsql_llm::{GroqProvider, LlmGateway};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const FINAL_EXECUTE_TIMEOUT_SECS: u64 = 30;

/// Per-call options for `Pipeline::run`.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub num_candidates: usize,
    pub num_unit_tests: usize,
    pub disable_unit_test: bool,
    pub execute: bool,
    pub explain: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_candidates: 3,
            num_unit_tests: 5,
            disable_unit_test: false,
            execute: true,
            explain: true,
        }
    }
}

/// The text-to-SQL pipeline. Cheap to share behind an `Arc`; concurrent
/// `run` calls share only the catalog, preprocessor, gateway counters, and
/// database pool.
pub struct Pipeline {
    services: Arc<Services>,
    ir: InformationRetrieverAgent,
    ss: SchemaSelectorAgent,
    cg: CandidateGeneratorAgent,
    ut: UnitTesterAgent,
    re: ResultExplainerAgent,
}

impl Pipeline {
    /// Assemble a pipeline from pre-built services (used by tests and by
    /// callers that manage startup themselves).
    pub fn from_services(services: Arc<Services>) -> Self {
        Self {
            ir: InformationRetrieverAgent::new(services.clone()),
            ss: SchemaSelectorAgent::new(services.clone()),
            cg: CandidateGeneratorAgent::new(services.clone()),
            ut: UnitTesterAgent::new(services.clone()),
            re: ResultExplainerAgent::new(services.clone()),
            services,
        }
    }

    /// Full startup: validate config, connect the database, refresh or
    /// load the schema catalog, build or load the preprocessor indexes,
    /// then wire the agents. The init order is mandatory.
    pub async fn initialize(config: PipelineConfig) -> ClinsqlResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let db = DbClient::connect(&config.database, config.row_cap)?;

        let catalog = Arc::new(
            SchemaCatalog::load_or_refresh(&db, Path::new(&config.schema_cache_path), true).await?,
        );

        let preprocessor = Arc::new(
            Preprocessor::load_or_build(
                &db,
                &catalog,
                Path::new(&config.preprocess_cache_path),
                Arc::new(FeatureEmbedder),
            )
            .await?,
        );

        let provider = GroqProvider::with_base_url(config.api_key.clone(), config.base_url.clone());
        let gateway = Arc::new(LlmGateway::new(Arc::new(provider)));

        let services = Arc::new(Services::new(gateway, db, catalog, preprocessor, config));
        Ok(Self::from_services(services))
    }

    /// Gateway usage counters, for observability.
    pub fn usage_stats(&self) -> clinsql_llm::UsageStats {
        self.services.gateway.usage_stats()
    }

    /// Run the full pipeline for one question.
    pub async fn run(
        &self,
        question: &str,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let start = Instant::now();
        let mut pipeline = PipelineResult {
            question: question.to_string(),
            ..Default::default()
        };

        tracing::info!(question, "pipeline start");

        // Stage 1: Information Retriever (fatal on failure).
        let ir_result = self.ir.execute(question, cancel).await;
        pipeline.total_tokens += ir_result.tokens_used;
        if !ir_result.success {
            pipeline.error = Some(format!(
                "IR agent failed: {}",
                ir_result.error.as_deref().unwrap_or("unknown")
            ));
            pipeline.ir_result = Some(ir_result);
            pipeline.total_time = start.elapsed().as_secs_f64();
            return pipeline;
        }
        let ir_data = ir_result.data.clone().unwrap_or_default();
        pipeline.ir_result = Some(ir_result);
        tracing::info!("IR complete");

        // Stage 2: Schema Selector (fatal on failure).
        let ss_result = self.ss.execute(question, &ir_data, cancel).await;
        pipeline.total_tokens += ss_result.tokens_used;
        if !ss_result.success {
            pipeline.error = Some(format!(
                "SS agent failed: {}",
                ss_result.error.as_deref().unwrap_or("unknown")
            ));
            pipeline.ss_result = Some(ss_result);
            pipeline.total_time = start.elapsed().as_secs_f64();
            return pipeline;
        }
        let ss_data = ss_result.data.clone().unwrap_or_default();
        pipeline.ss_result = Some(ss_result);
        tracing::info!("SS complete");

        // Stage 3: Candidate Generator (fatal when no candidates emerge).
        let cg_result = self
            .cg
            .execute(question, &ss_data, &ir_data, options.num_candidates, cancel)
            .await;
        pipeline.total_tokens += cg_result.tokens_used;
        if !cg_result.success {
            pipeline.error = Some(format!(
                "CG agent failed: {}",
                cg_result.error.as_deref().unwrap_or("unknown")
            ));
            pipeline.cg_result = Some(cg_result);
            pipeline.total_time = start.elapsed().as_secs_f64();
            return pipeline;
        }
        let cg_data = cg_result.data.clone().unwrap_or_default();
        pipeline.cg_result = Some(cg_result);
        tracing::info!("CG complete");

        let candidates: Vec<SqlCandidate> = cg_data
            .get("candidates")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        // Stage 4: Unit Tester, or the documented shortcut.
        let best_sql: Option<String> = if options.disable_unit_test {
            tracing::warn!("unit testing disabled; selecting first valid CG candidate");
            candidates
                .iter()
                .find(|c| c.is_valid)
                .or_else(|| candidates.first())
                .map(|c| c.sql.clone())
        } else {
            let ut_result = self
                .ut
                .execute(question, &candidates, options.num_unit_tests, cancel)
                .await;
            pipeline.total_tokens += ut_result.tokens_used;
            let sql = if ut_result.success {
                ut_result
                    .data
                    .as_ref()
                    .and_then(|data| data.get("selected_sql"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            } else {
                // Documented fallback: CG's own ordering picks the winner.
                tracing::warn!("UT failed, falling back to CG best candidate");
                cg_data
                    .get("best_candidate")
                    .and_then(|v| v.get("sql"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            };
            pipeline.ut_result = Some(ut_result);
            sql
        };
        pipeline.sql = best_sql.clone();

        // Execute the winner.
        let mut execution: Option<ExecutionOutcome> = None;
        if options.execute {
            if let Some(sql) = &best_sql {
                match self
                    .services
                    .db
                    .safe_execute(sql, FINAL_EXECUTE_TIMEOUT_SECS, cancel)
                    .await
                {
                    Ok(outcome) => {
                        if outcome.success {
                            tracing::info!(rows = outcome.row_count, "execution complete");
                        } else {
                            tracing::warn!(error = ?outcome.error, "execution failed");
                        }
                        execution = Some(outcome);
                    }
                    Err(e) => {
                        execution = Some(ExecutionOutcome::failure(e.to_string()));
                    }
                }
            }
        }
        pipeline.execution_result = execution.clone();

        // Stage 5: Result Explainer (optional, never fatal).
        if options.explain {
            if let (Some(sql), Some(outcome)) = (&best_sql, &execution) {
                if outcome.success {
                    let re_result = self.re.execute(question, sql, outcome, cancel).await;
                    pipeline.total_tokens += re_result.tokens_used;
                    if re_result.success {
                        pipeline.explanation = re_result
                            .data
                            .as_ref()
                            .and_then(|data| data.get("explanation"))
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());
                    } else {
                        tracing::warn!(error = ?re_result.error, "RE failed");
                    }
                    pipeline.re_result = Some(re_result);
                }
            }
        }

        pipeline.success = pipeline.sql.is_some();
        pipeline.total_time = start.elapsed().as_secs_f64();
        tracing::info!(
            success = pipeline.success,
            total_time = pipeline.total_time,
            total_tokens = pipeline.total_tokens,
            "pipeline complete"
        );
        pipeline
    }
}
