//! Embedding backends for the description index
//!
//! The default embedder is a deterministic 45-dimensional feature vector so
//! the index works without any model artifacts. A learned
//! sentence-transformer backend is available behind the `fastembed`
//! feature.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clinical keywords whose presence forms the tail of the feature vector.
const CLINICAL_TERMS: [&str; 13] = [
    "patient", "subject", "site", "visit", "query", "status", "date", "count", "id", "name",
    "type", "code", "value",
];

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("static regex"));

/// An embedding backend. Implementations must be thread-safe.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Identifier recorded in logs and stats.
    fn backend_id(&self) -> &str;
}

// ============================================================================
// DETERMINISTIC FALLBACK
// ============================================================================

/// Deterministic bag-of-features embedder: 6 word-length statistics, 26
/// normalized character frequencies, and 13 clinical keyword flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEmbedder;

impl EmbeddingBackend for FeatureEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let words: Vec<&str> = WORD_RE.find_iter(&text).map(|m| m.as_str()).collect();
        let lengths: Vec<usize> = words.iter().map(|w| w.chars().count()).collect();
        let unique: std::collections::HashSet<&&str> = words.iter().collect();

        let mut features = Vec::with_capacity(45);

        // Word-length statistics.
        let word_count = words.len() as f32;
        features.push(if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f32 / lengths.len() as f32
        });
        features.push(lengths.iter().max().copied().unwrap_or(0) as f32);
        features.push(lengths.iter().min().copied().unwrap_or(0) as f32);
        features.push(word_count);
        features.push(text.chars().filter(|c| c.is_alphanumeric()).count() as f32);
        features.push(unique.len() as f32);

        // Normalized character frequencies a-z.
        let mut char_counts = [0usize; 26];
        for c in text.chars() {
            if c.is_ascii_lowercase() {
                char_counts[(c as u8 - b'a') as usize] += 1;
            }
        }
        let total = char_counts.iter().sum::<usize>().max(1) as f32;
        features.extend(char_counts.iter().map(|&c| c as f32 / total));

        // Clinical keyword flags.
        features.extend(
            CLINICAL_TERMS
                .iter()
                .map(|term| if text.contains(term) { 1.0 } else { 0.0 }),
        );

        features
    }

    fn backend_id(&self) -> &str {
        "feature-45"
    }
}

// ============================================================================
// SENTENCE-TRANSFORMER BACKEND (optional)
// ============================================================================

#[cfg(feature = "fastembed")]
pub use sentence::SentenceEmbedder;

#[cfg(feature = "fastembed")]
mod sentence {
    use super::EmbeddingBackend;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    /// all-MiniLM-L6-v2 sentence embeddings via ONNX runtime.
    pub struct SentenceEmbedder {
        model: TextEmbedding,
    }

    impl SentenceEmbedder {
        pub fn try_new() -> Result<Self, String> {
            let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
            options.show_download_progress = false;
            let model = TextEmbedding::try_new(options).map_err(|e| e.to_string())?;
            Ok(Self { model })
        }
    }

    impl EmbeddingBackend for SentenceEmbedder {
        fn embed(&self, text: &str) -> Vec<f32> {
            self.model
                .embed(vec![text], None)
                .ok()
                .and_then(|mut v| v.pop())
                .unwrap_or_default()
        }

        fn backend_id(&self) -> &str {
            "all-MiniLM-L6-v2"
        }
    }
}

// ============================================================================
// COSINE SIMILARITY
// ============================================================================

/// Cosine similarity, zero-padding the shorter vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().max(b.len());
    if len == 0 {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0.0) as f64;
        let y = b.get(i).copied().unwrap_or(0.0) as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
