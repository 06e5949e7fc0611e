//! CLINSQL Agents - Tools, Agents, Orchestrator
//!
//! The five cooperating agents of the text-to-SQL pipeline and the
//! orchestrator that sequences them:
//!
//! 1. Information Retriever (IR): extract_keywords, retrieve_entity, retrieve_context
//! 2. Schema Selector (SS): select_tables, select_columns
//! 3. Candidate Generator (CG): generate_candidate_query, revise
//! 4. Unit Tester (UT): generate_unit_test, evaluate
//! 5. Result Explainer (RE): explain_results, summarize_large_results, split_complex_query

mod agents;
mod orchestrator;
pub mod prompts;
pub mod tools;

pub use agents::{
    CandidateGeneratorAgent, InformationRetrieverAgent, ResultExplainerAgent, SchemaSelectorAgent,
    UnitTesterAgent,
};
pub use orchestrator::{Pipeline, RunOptions};

use clinsql_catalog::SchemaCatalog;
use clinsql_core::PipelineConfig;
use clinsql_db::DbClient;
use clinsql_index::Preprocessor;
use clinsql_llm::LlmGateway;
use std::sync::Arc;

/// The process-wide services every agent and tool borrows. Created once at
/// startup (db, then catalog, then preprocessor, then gateway) and treated
/// as immutable afterwards, so the pipeline is re-entrant.
pub struct Services {
    pub gateway: Arc<LlmGateway>,
    pub db: DbClient,
    pub catalog: Arc<SchemaCatalog>,
    pub preprocessor: Arc<Preprocessor>,
    pub config: Arc<PipelineConfig>,
}

impl Services {
    pub fn new(
        gateway: Arc<LlmGateway>,
        db: DbClient,
        catalog: Arc<SchemaCatalog>,
        preprocessor: Arc<Preprocessor>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            gateway,
            db,
            catalog,
            preprocessor,
            config,
        }
    }
}
