//! SQL and JSON extraction from untrusted model output
//!
//! Every model response is treated as untrusted text. The extractors try
//! the most structured form first and degrade to progressively looser
//! matches.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static SQL_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```sql\s*([\s\S]*?)\s*```").expect("static regex")
});
static ANY_FENCE_SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```\s*(SELECT[\s\S]*?)\s*```").expect("static regex")
});
static BARE_SELECT_TERMINATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(SELECT\s+[\s\S]+?;)").expect("static regex")
});
static BARE_SELECT_TRAILING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(SELECT\s+[\s\S]+?)(?:\n\n|$)").expect("static regex")
});
static JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```json\s*([\s\S]*?)\s*```").expect("static regex")
});
static ANY_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```\s*([\s\S]*?)\s*```").expect("static regex")
});

/// Extract a SQL statement from model output.
///
/// Recognizes, in order: a fenced block labeled `sql`, any fenced block
/// beginning with SELECT, a bare `SELECT ...;` statement, and finally a
/// trailing bare SELECT. The result is normalized to end with a single `;`.
pub fn extract_sql(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }

    for pattern in [
        &*SQL_FENCE,
        &*ANY_FENCE_SELECT,
        &*BARE_SELECT_TERMINATED,
        &*BARE_SELECT_TRAILING,
    ] {
        if let Some(captures) = pattern.captures(text) {
            if let Some(matched) = captures.get(1) {
                let sql = matched.as_str().trim();
                if !sql.is_empty() {
                    return Some(normalize_sql(sql));
                }
            }
        }
    }

    let trimmed = text.trim();
    if trimmed.to_ascii_uppercase().starts_with("SELECT") {
        return Some(normalize_sql(trimmed));
    }

    None
}

fn normalize_sql(sql: &str) -> String {
    let mut sql = sql.trim().trim_end_matches(';').trim_end().to_string();
    sql.push(';');
    sql
}

/// Extract a JSON value from model output.
///
/// Tries direct parse, fenced ```json / ``` blocks, then the first
/// `{...}` span.
pub fn extract_json(text: &str) -> Option<JsonValue> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        return Some(value);
    }

    for pattern in [&*JSON_FENCE, &*ANY_FENCE] {
        if let Some(captures) = pattern.captures(text) {
            if let Some(matched) = captures.get(1) {
                if let Ok(value) = serde_json::from_str::<JsonValue>(matched.as_str().trim()) {
                    return Some(value);
                }
            }
        }
    }

    // First brace-balanced span.
    if let Some(span) = first_object_span(text) {
        if let Ok(value) = serde_json::from_str::<JsonValue>(span) {
            return Some(value);
        }
    }

    None
}

/// Locate the first `{...}` span with balanced braces, ignoring braces
/// inside double-quoted strings.
fn first_object_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_extract_sql_prefers_labeled_fence() {
        let text = "Here is the query:\n```sql\nSELECT COUNT(*) FROM _studies\n```\nDone.";
        assert_eq!(
            extract_sql(text).as_deref(),
            Some("SELECT COUNT(*) FROM _studies;")
        );
    }

    #[test]
    fn test_extract_sql_from_unlabeled_fence() {
        let text = "```\nSELECT site_number FROM sites;\n```";
        assert_eq!(
            extract_sql(text).as_deref(),
            Some("SELECT site_number FROM sites;")
        );
    }

    #[test]
    fn test_extract_sql_bare_statement() {
        let text = "The answer is computed by SELECT AVG(days_open) FROM data_queries; as shown.";
        assert_eq!(
            extract_sql(text).as_deref(),
            Some("SELECT AVG(days_open) FROM data_queries;")
        );
    }

    #[test]
    fn test_extract_sql_raw_select_text() {
        assert_eq!(
            extract_sql("SELECT 1").as_deref(),
            Some("SELECT 1;")
        );
    }

    #[test]
    fn test_extract_sql_none_for_prose() {
        assert_eq!(extract_sql("I cannot answer that."), None);
        assert_eq!(extract_sql(""), None);
    }

    #[test]
    fn test_extract_json_direct() {
        let value = extract_json(r#"{"keywords": ["site"]}"#).unwrap();
        assert_eq!(value["keywords"][0], "site");
    }

    #[test]
    fn test_extract_json_from_fence() {
        let text = "Sure!\n```json\n{\"tables\": [\"sites\"]}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"tables": ["sites"]}));
    }

    #[test]
    fn test_extract_json_from_prose_span() {
        let text = "The result is {\"n\": 5} as requested.";
        assert_eq!(extract_json(text), Some(json!({"n": 5})));
    }

    #[test]
    fn test_extract_json_handles_braces_inside_strings() {
        let text = "prefix {\"a\": \"{not a brace}\", \"b\": 1} suffix";
        let value = extract_json(text).unwrap();
        assert_eq!(value["b"], 1);
    }

    #[test]
    fn test_extract_json_none_for_garbage() {
        assert_eq!(extract_json("not json at all"), None);
        assert_eq!(extract_json("{broken"), None);
    }

    proptest! {
        #[test]
        fn prop_extracted_sql_always_ends_with_one_semicolon(body in "[a-zA-Z0-9_ ,.*()=']{1,80}") {
            let text = format!("```sql\nSELECT {}\n```", body);
            if let Some(sql) = extract_sql(&text) {
                prop_assert!(sql.ends_with(';'));
                prop_assert!(!sql.ends_with(";;"));
            }
        }

        #[test]
        fn prop_extract_json_round_trips_objects(n in 0i64..1000, key in "[a-z]{1,10}") {
            let value = json!({ key.clone(): n });
            let text = format!("noise before {} noise after", value);
            prop_assert_eq!(extract_json(&text), Some(value));
        }
    }
}
