//! MinHash-LSH over database values
//!
//! Signatures use a fixed-seed family of 128 affine permutations over the
//! Mersenne prime 2^31-1, banded into 32 bands of 4 rows. Collision
//! probability in a band approximates the Jaccard similarity of the
//! underlying shingle sets. Band buckets hold indices into a flat value
//! vector, which keeps the structure serializable and safe for concurrent
//! reads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

const NUM_PERM: usize = 128;
const NUM_BANDS: usize = 32;
const ROWS_PER_BAND: usize = NUM_PERM / NUM_BANDS;
const PRIME: u64 = (1 << 31) - 1;
const COEFF_SEED: u64 = 42;
const SHINGLE_K: usize = 3;

/// A distinct string drawn from one text column of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedValue {
    pub value: String,
    pub table: String,
    pub column: String,
}

/// The fixed permutation family. Regenerated from the seed on load, so the
/// cache never stores coefficients.
#[derive(Debug, Clone)]
struct PermutationFamily {
    a: Vec<u64>,
    b: Vec<u64>,
}

impl PermutationFamily {
    fn fixed() -> Self {
        let mut rng = StdRng::seed_from_u64(COEFF_SEED);
        let a = (0..NUM_PERM).map(|_| rng.random_range(1..PRIME)).collect();
        let b = (0..NUM_PERM).map(|_| rng.random_range(0..PRIME)).collect();
        Self { a, b }
    }
}

/// k-shingles (character n-grams) of a lowercased string. Strings shorter
/// than k shingle to themselves.
pub fn shingles(text: &str) -> BTreeSet<String> {
    let text = text.to_lowercase();
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.len() < SHINGLE_K {
        let mut set = BTreeSet::new();
        set.insert(chars.iter().collect());
        return set;
    }
    chars
        .windows(SHINGLE_K)
        .map(|w| w.iter().collect())
        .collect()
}

/// Jaccard similarity of the shingle sets of two strings.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let sa = shingles(a);
    let sb = shingles(b);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Stable 64-bit hash of a shingle: first 8 bytes of SHA-256. Fixed across
/// processes so cached signatures stay queryable after reload.
fn shingle_hash(shingle: &str) -> u64 {
    let digest = Sha256::digest(shingle.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Deterministic hash of one band of a signature.
fn band_hash(band: &[u64]) -> u64 {
    let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
    for &row in band {
        acc ^= row;
        acc = acc.wrapping_mul(0x1000_0000_01b3);
    }
    acc
}

/// MinHash-LSH index over distinct column values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinHashLsh {
    threshold: f64,
    values: Vec<IndexedValue>,
    /// One bucket map per band. BTreeMap keeps serialization stable.
    bands: Vec<BTreeMap<u64, Vec<u32>>>,
    #[serde(skip, default = "PermutationFamily::fixed")]
    permutations: PermutationFamily,
}

impl Default for MinHashLsh {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl MinHashLsh {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            values: Vec::new(),
            bands: vec![BTreeMap::new(); NUM_BANDS],
            permutations: PermutationFamily::fixed(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// MinHash signature of a string.
    fn signature(&self, text: &str) -> [u64; NUM_PERM] {
        let mut signature = [u64::MAX; NUM_PERM];
        for shingle in shingles(text) {
            let h = shingle_hash(&shingle) % PRIME;
            for i in 0..NUM_PERM {
                let permuted = (self.permutations.a[i] * h + self.permutations.b[i]) % PRIME;
                if permuted < signature[i] {
                    signature[i] = permuted;
                }
            }
        }
        signature
    }

    fn band_keys(signature: &[u64; NUM_PERM]) -> [u64; NUM_BANDS] {
        let mut keys = [0u64; NUM_BANDS];
        for (band_idx, key) in keys.iter_mut().enumerate() {
            let start = band_idx * ROWS_PER_BAND;
            *key = band_hash(&signature[start..start + ROWS_PER_BAND]);
        }
        keys
    }

    /// Add a value to the index.
    pub fn add(&mut self, value: IndexedValue) {
        let idx = self.values.len() as u32;
        let signature = self.signature(&value.value);
        self.values.push(value);

        for (band_idx, key) in Self::band_keys(&signature).iter().enumerate() {
            let bucket = self.bands[band_idx].entry(*key).or_default();
            bucket.push(idx);
        }
    }

    /// Query for similar values. Candidates come from all band buckets the
    /// query signature lands in; each is rescored with exact shingle
    /// Jaccard and kept when it clears half the index threshold.
    pub fn query(&self, text: &str, top_k: usize) -> Vec<(&IndexedValue, f64)> {
        let signature = self.signature(text);

        let mut candidates: BTreeSet<u32> = BTreeSet::new();
        for (band_idx, key) in Self::band_keys(&signature).iter().enumerate() {
            if let Some(bucket) = self.bands[band_idx].get(key) {
                candidates.extend(bucket.iter().copied());
            }
        }

        let mut results: Vec<(&IndexedValue, f64)> = candidates
            .into_iter()
            .filter_map(|idx| self.values.get(idx as usize))
            .filter_map(|value| {
                let similarity = jaccard_similarity(text, &value.value);
                (similarity >= self.threshold * 0.5).then_some((value, similarity))
            })
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.value.cmp(&b.0.value))
        });
        results.truncate(top_k);
        results
    }
}

// ============================================================================
// EDIT DISTANCE
// ============================================================================

/// Levenshtein edit distance, case-insensitive, two-row formulation.
pub fn edit_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.to_lowercase().chars().collect();
    let b: Vec<char> = s2.to_lowercase().chars().collect();
    let (a, b) = if a.len() < b.len() { (b, a) } else { (a, b) };

    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &c1) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &c2) in b.iter().enumerate() {
            let insertions = prev[j + 1] + 1;
            let deletions = curr[j] + 1;
            let substitutions = prev[j] + usize::from(c1 != c2);
            curr[j + 1] = insertions.min(deletions).min(substitutions);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Edit-distance similarity on a 0-1 scale.
pub fn edit_distance_similarity(s1: &str, s2: &str) -> f64 {
    let max_len = s1.chars().count().max(s2.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - edit_distance(s1, s2) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_value(value: &str) -> IndexedValue {
        IndexedValue {
            value: value.to_string(),
            table: "sites".to_string(),
            column: "site_number".to_string(),
        }
    }

    #[test]
    fn test_shingles_of_short_string() {
        let set = shingles("ab");
        assert_eq!(set.len(), 1);
        assert!(set.contains("ab"));
    }

    #[test]
    fn test_jaccard_identical_strings() {
        assert_eq!(jaccard_similarity("Site 18", "site 18"), 1.0);
    }

    #[test]
    fn test_query_finds_near_duplicate() {
        let mut index = MinHashLsh::new(0.3);
        index.add(make_value("Site 18"));
        index.add(make_value("Site 21"));
        index.add(make_value("completely unrelated text"));

        let results = index.query("site 18", 5);
        assert!(!results.is_empty());
        assert_eq!(results[0].0.value, "Site 18");
        assert!(results[0].1 > 0.9);
    }

    #[test]
    fn test_query_exact_country_code() {
        let mut index = MinHashLsh::new(0.3);
        for code in ["JPN", "USA", "DEU", "FRA"] {
            index.add(make_value(code));
        }
        let results = index.query("JPN", 3);
        assert_eq!(results[0].0.value, "JPN");
    }

    #[test]
    fn test_signature_is_deterministic_across_instances() {
        let a = MinHashLsh::new(0.3);
        let b = MinHashLsh::new(0.3);
        assert_eq!(a.signature("Week 2 Day 7").as_slice(), b.signature("Week 2 Day 7").as_slice());
    }

    #[test]
    fn test_serde_round_trip_preserves_query_results() {
        let mut index = MinHashLsh::new(0.3);
        index.add(make_value("Site 18"));
        index.add(make_value("SCREENING"));

        let encoded = serde_json::to_string(&index).unwrap();
        let decoded: MinHashLsh = serde_json::from_str(&encoded).unwrap();

        let before: Vec<String> = index.query("site 18", 5).iter().map(|(v, _)| v.value.clone()).collect();
        let after: Vec<String> = decoded.query("site 18", 5).iter().map(|(v, _)| v.value.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_edit_distance_basics() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "SAME"), 0);
    }

    proptest! {
        #[test]
        fn prop_jaccard_is_bounded(a in "[a-z0-9 ]{0,30}", b in "[a-z0-9 ]{0,30}") {
            let s = jaccard_similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn prop_edit_distance_is_symmetric(a in "[a-zA-Z ]{0,20}", b in "[a-zA-Z ]{0,20}") {
            prop_assert_eq!(edit_distance(&a, &b), edit_distance(&b, &a));
        }

        #[test]
        fn prop_edit_distance_identity(a in "[a-z]{0,20}") {
            prop_assert_eq!(edit_distance(&a, &a), 0);
        }

        #[test]
        fn prop_edit_similarity_bounded(a in "[a-z]{1,20}", b in "[a-z]{1,20}") {
            let s = edit_distance_similarity(&a, &b);
            prop_assert!((0.0..=1.0).contains(&s));
        }
    }
}
