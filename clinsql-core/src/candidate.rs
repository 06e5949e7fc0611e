//! SQL candidate types

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// GENERATION STRATEGY
// ============================================================================

/// One of the fixed generation strategies, distinguished only by prompt
/// template and temperature. The declaration order is the preference order
/// used when unit-test scores tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    Standard,
    Cot,
    Decomposition,
}

impl GenerationStrategy {
    /// Full sequence in preference order. `num_candidates` takes a prefix.
    pub const SEQUENCE: [GenerationStrategy; 3] =
        [Self::Standard, Self::Cot, Self::Decomposition];

    pub fn temperature(&self) -> f32 {
        match self {
            Self::Standard => 0.10,
            Self::Cot => 0.20,
            Self::Decomposition => 0.15,
        }
    }

    /// Position in the preference sequence.
    pub fn rank(&self) -> usize {
        match self {
            Self::Standard => 0,
            Self::Cot => 1,
            Self::Decomposition => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Cot => "cot",
            Self::Decomposition => "decomposition",
        }
    }
}

// ============================================================================
// CANDIDATE
// ============================================================================

/// Small preview of a candidate's execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResultPreview {
    pub columns: Vec<String>,
    pub row_count: usize,
    /// Up to three sample rows.
    pub sample_rows: Vec<JsonValue>,
}

/// A generated SQL candidate and everything learned about it during the
/// validate/execute/revise loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub strategy: GenerationStrategy,
    pub sql: String,
    pub is_valid: bool,
    pub error: Option<String>,
    pub result_preview: Option<ResultPreview>,
    #[serde(default)]
    pub was_revised: bool,
}

impl SqlCandidate {
    pub fn new(strategy: GenerationStrategy, sql: impl Into<String>) -> Self {
        Self {
            strategy,
            sql: sql.into(),
            is_valid: false,
            error: None,
            result_preview: None,
            was_revised: false,
        }
    }
}

/// Sort candidates valid-first, then by strategy preference.
pub fn sort_candidates(candidates: &mut [SqlCandidate]) {
    candidates.sort_by_key(|c| (!c.is_valid, c.strategy.rank()));
}
