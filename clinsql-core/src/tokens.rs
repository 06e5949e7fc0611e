//! Token estimation
//!
//! All budgeting code uses this one fixed estimator so that projecting the
//! same schema with the same budget always yields byte-identical output.

/// Estimate the token count of a text.
pub fn estimate_tokens(text: &str) -> i32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f32 * 0.75).ceil() as i32
}

/// Truncate text so its estimate fits within `max_tokens`. Cuts on a char
/// boundary; never panics on multi-byte input.
pub fn truncate_to_token_budget(text: &str, max_tokens: i32) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    if max_tokens <= 0 {
        return String::new();
    }
    // ceil(len * 3/4) <= budget  <=>  len <= budget * 4/3
    let max_bytes = (max_tokens as usize) * 4 / 3;
    let mut out = String::new();
    for ch in text.chars() {
        if out.len() + ch.len_utf8() > max_bytes {
            break;
        }
        out.push(ch);
    }
    out
}

/// Split text into chunks of roughly `chunk_tokens` each.
pub fn split_into_chunks(text: &str, chunk_tokens: i32) -> Vec<String> {
    if chunk_tokens <= 0 || text.is_empty() {
        return vec![text.to_string()];
    }
    let chunk_chars = ((chunk_tokens as f32 / 0.75).floor() as usize).max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "hello" = 5 chars * 0.75 = 3.75, ceil = 4
        assert_eq!(estimate_tokens("hello"), 4);
    }

    #[test]
    fn test_truncate_noop_when_within_budget() {
        assert_eq!(truncate_to_token_budget("abc", 100), "abc");
    }

    #[test]
    fn test_truncate_zero_budget() {
        assert_eq!(truncate_to_token_budget("abc", 0), "");
    }

    #[test]
    fn test_split_into_chunks_round_trips() {
        let text = "x".repeat(100);
        let chunks = split_into_chunks(&text, 10);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    proptest! {
        #[test]
        fn prop_truncated_text_fits_budget(text in ".{0,400}", budget in 0i32..200) {
            let truncated = truncate_to_token_budget(&text, budget);
            prop_assert!(estimate_tokens(&truncated) <= budget.max(0));
        }

        #[test]
        fn prop_estimate_is_monotone_in_length(text in "[a-z ]{0,200}") {
            let longer = format!("{}{}", text, "abcd");
            prop_assert!(estimate_tokens(&longer) >= estimate_tokens(&text));
        }

        #[test]
        fn prop_chunks_concat_to_original(text in "[a-zA-Z0-9 ]{0,300}", size in 1i32..50) {
            let chunks = split_into_chunks(&text, size);
            prop_assert_eq!(chunks.concat(), text);
        }
    }
}
