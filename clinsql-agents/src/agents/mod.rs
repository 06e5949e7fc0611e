//! The five pipeline agents

mod candidate_generator;
mod information_retriever;
mod result_explainer;
mod schema_selector;
mod unit_tester;

pub use candidate_generator::CandidateGeneratorAgent;
pub use information_retriever::InformationRetrieverAgent;
pub use result_explainer::ResultExplainerAgent;
pub use schema_selector::SchemaSelectorAgent;
pub use unit_tester::UnitTesterAgent;

use std::time::Instant;

/// Elapsed seconds since a stage started.
pub(crate) fn elapsed_secs(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}
