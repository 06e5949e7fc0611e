//! Prompt templates for every LLM-backed tool
//!
//! Templates are plain string constants with `{placeholder}` slots filled by
//! `fill()`. Keeping them in one module makes the clinical heuristics easy
//! to audit.

/// Replace `{name}` placeholders in a template.
pub fn fill(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in replacements {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

// ============================================================================
// CANDIDATE GENERATOR
// ============================================================================

/// System prompt shared by every generation strategy. The country-code and
/// subject_level_metric rules encode how this particular database is laid
/// out; do not generalize them.
pub const GENERATOR_SYSTEM_PROMPT: &str = "\
You are an expert PostgreSQL developer for clinical trials databases.

Database conventions you MUST follow:
- Country values are stored as three-letter codes ('USA', 'JPN', 'DEU'), never full country names. \
When the question names a country, filter on its three-letter code.
- For patient-level and site-level counts, prefer tables whose name ends in subject_level_metric.
- Status and enum values are uppercase ('OPEN', 'ENROLLED', 'VERIFIED'); quote them exactly.
- Use IS NULL / IS NOT NULL, never = NULL.
- Tables prefixed with an underscore (_studies, _table_metadata) describe the database itself; \
use them for questions about studies or database structure.";

pub const DIRECT_SQL_PROMPT: &str = "\
Generate a SQL query to answer the following question.

## Database Schema:
{schema_context}
{entity_block}
## Question:
{question}

## Guidelines:
- Use proper JOIN syntax (explicit INNER JOIN, LEFT JOIN)
- Use table aliases for readability
- Include appropriate WHERE filters
- Add ORDER BY for sorted results when logical
- Use LIMIT for potentially large result sets
- Handle NULL values appropriately

## Output:
Provide only the SQL query wrapped in ```sql blocks. No explanation needed.";

pub const COT_SQL_PROMPT: &str = "\
Generate a SQL query to answer the user's question using step-by-step reasoning.

## Database Schema:
{schema_context}
{entity_block}
## Question:
{question}

## Instructions:
Think through this step by step:

### Step 1: Identify the output columns
What data should be returned? List the SELECT columns.

### Step 2: Identify the base table
Which table contains the primary data being queried?

### Step 3: Determine required JOINs
What tables need to be joined and on which columns?

### Step 4: Define filter conditions
What WHERE conditions are needed?

### Step 5: Add aggregations/grouping if needed
Is COUNT, SUM, AVG, etc. required? What GROUP BY is needed?

### Step 6: Construct the final SQL

## Output:
Provide your reasoning for each step, then output the final SQL query wrapped in ```sql blocks.";

pub const DECOMPOSITION_SQL_PROMPT: &str = "\
Generate SQL by decomposing the question into sub-queries.

## Database Schema:
{schema_context}
{entity_block}
## Question:
{question}

## Instructions:
Break down the question into simpler sub-queries, then combine them.

### Decomposition:
1. Identify independent sub-questions
2. Write a SQL query for each sub-question
3. Combine using JOINs, subqueries, or CTEs

### Example Approach:
For \"Show sites with more than 10 open queries in Study 1\":
- Sub-query 1: Get site_ids from Study 1
- Sub-query 2: Count open queries per subject
- Sub-query 3: Aggregate to site level
- Combine: Filter sites with count > 10

## Output:
First show the sub-queries with explanations, then provide the final combined SQL in ```sql blocks.";

// ============================================================================
// REVISION
// ============================================================================

pub const REVISE_PROMPT: &str = "\
You are a PostgreSQL expert debugging a SQL query for a clinical trials database.

## Original Question:
{question}

## Generated SQL:
```sql
{sql}
```

## Execution Result:
{error}

## Database Schema (relevant parts):
{schema_context}

## Instructions:
Analyze the error and fix the SQL query.

Common issues to check:
1. **Syntax errors**: Missing commas, parentheses, quotes
2. **Table/column names**: Verify they exist in the schema
3. **Join conditions**: Ensure proper join paths exist
4. **Data types**: Ensure comparisons use correct types (strings need quotes)
5. **Aggregation**: If using GROUP BY, ensure SELECT columns are aggregated or grouped
6. **NULL handling**: Use IS NULL/IS NOT NULL instead of = NULL
7. **Enum values**: Use exact case and quotes for enum values

## Output:
1. Explain what went wrong
2. Describe the fix
3. Provide the corrected SQL in ```sql blocks";

// ============================================================================
// INFORMATION RETRIEVER
// ============================================================================

pub const EXTRACT_KEYWORDS_SYSTEM: &str = "\
You extract search terms from questions about a clinical trials database. \
Respond with a JSON object containing four arrays: \"keywords\" (general search terms), \
\"entities\" (specific named values like site or study identifiers), \
\"clinical_terms\" (clinical vocabulary such as sae, open query, protocol deviation), \
and \"filters\" (conditions such as numeric thresholds or statuses).";

pub const EXTRACT_KEYWORDS_USER: &str = "\
Examples:

Question: \"Show patients at Site 18 with more than 45 days open queries\"
{\"keywords\": [\"patients\", \"site\", \"open\", \"queries\", \"days\"], \"entities\": [\"Site 18\"], \"clinical_terms\": [\"open query\"], \"filters\": [\"more than 45 days\"]}

Question: \"How many SAEs were reported in Study 10?\"
{\"keywords\": [\"sae\", \"reported\", \"study\"], \"entities\": [\"Study 10\"], \"clinical_terms\": [\"sae\"], \"filters\": []}

Question: \"List sites with no enrollments\"
{\"keywords\": [\"sites\", \"enrollments\"], \"entities\": [], \"clinical_terms\": [\"enrolled\"], \"filters\": [\"no enrollments\"]}

Question: \"{question}\"";

// ============================================================================
// SCHEMA SELECTOR
// ============================================================================

pub const SELECT_TABLES_SYSTEM: &str = "\
You are a clinical trials database expert selecting the minimal set of tables needed to \
answer a question. Respond with JSON only.";

pub const SELECT_TABLES_USER: &str = "\
## Candidate Tables:
{schema_context}

## Question:
{question}

## Extracted hints:
Keywords: {keywords}
Entities: {entities}

## Instructions:
Select at most {max_tables} tables. Tag each as \"primary\" (holds the answer data), \
\"join\" (needed to connect tables), or \"filter\" (supplies WHERE values). \
Add join-key hints of the form \"t1.c1 = t2.c2\" where you can.

## Output Format (JSON):
{\"tables\": [{\"table\": \"name\", \"role\": \"primary|join|filter\", \"reason\": \"...\"}], \"join_hints\": [\"t1.c1 = t2.c2\"]}";

pub const SELECT_COLUMNS_SYSTEM: &str = "\
You select the columns of one table needed to answer a question. Respond with JSON only.";

pub const SELECT_COLUMNS_USER: &str = "\
## Table:
{table_ddl}

## Question:
{question}

## Instructions:
Pick only the columns needed, and say which clause each belongs in.

## Output Format (JSON):
{\"columns\": [{\"name\": \"column_name\", \"role\": \"SELECT|WHERE|JOIN|GROUP BY\"}]}";

// ============================================================================
// UNIT TESTER
// ============================================================================

pub const GENERATE_UNIT_TESTS_SYSTEM: &str = "\
You design unit tests that discriminate between candidate SQL queries for the same \
question. A unit test is a natural-language assertion about what a correct answer must \
do. Respond with JSON only.";

pub const GENERATE_UNIT_TESTS_USER: &str = "\
## Question:
{question}

## Candidate Queries:
{candidates}

## Instructions:
Write {num_tests} unit tests that would pass for a correct query and fail for an \
incorrect one. Focus on differences between the candidates: output columns, \
aggregation, filters, joins, and result shape.

## Output Format (JSON):
{\"tests\": [{\"description\": \"...\", \"expected_behavior\": \"...\", \"test_type\": \"columns|aggregation|filter|join|result_type\"}]}";

pub const EVALUATE_TEST_SYSTEM: &str = "\
You judge SQL candidates against one unit test. You see each candidate's SQL and a \
preview of its execution (columns, row count). Respond with JSON only.";

pub const EVALUATE_TEST_USER: &str = "\
## Question:
{question}

## Unit Test:
{test}

## Candidates:
{candidates}

## Output Format (JSON):
{\"results\": [{\"candidate\": 0, \"passes\": true, \"reasoning\": \"...\"}], \"best_candidate\": 0}";

// ============================================================================
// RESULT EXPLAINER
// ============================================================================

pub const EXPLAIN_RESULTS_SYSTEM: &str = "\
You explain SQL query results from a clinical trials database to a non-technical \
reader. Be direct and concrete; lead with the answer to the question.";

pub const EXPLAIN_RESULTS_USER: &str = "\
## Question:
{question}

## SQL:
```sql
{sql}
```

## Results ({row_count} rows):
{rows}

Explain what these results say, answering the original question.";

pub const SUMMARIZE_LARGE_RESULTS_USER: &str = "\
## Question:
{question}

## SQL:
```sql
{sql}
```

## Result size: {row_count} rows (sampled below)

## Column statistics:
{statistics}

## First 10 rows:
{head_rows}

## Last 5 rows:
{tail_rows}

Summarize what this result set shows, answering the original question. Mention that \
the rows shown are a sample of {row_count} total.";

pub const SPLIT_QUERY_SYSTEM: &str = "\
You decide whether a multi-join SQL query would be clearer as several simpler queries. \
Respond with JSON only.";

pub const SPLIT_QUERY_USER: &str = "\
## Question:
{question}

## SQL:
```sql
{sql}
```

## Instructions:
If splitting helps interpretation, produce up to 3 simpler queries, each answering part \
of the question. If the query is best kept whole, set should_split to false.

## Output Format (JSON):
{\"should_split\": true, \"queries\": [{\"sql\": \"SELECT ...\", \"description\": \"...\"}]}";

/// Canned explanation for empty result sets; no LLM call is made.
pub const EMPTY_RESULT_EXPLANATION: &str = "\
The query ran successfully but returned no rows. A few possible reasons:
- The filters may be stricter than intended (an exact status, date range, or identifier \
that matches nothing).
- The value you asked about may not exist in the data with that exact spelling.
- The question may be phrased around data this study does not collect.

Try relaxing a filter, or rephrase the question with a value that appears in the data.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_all_placeholders() {
        let out = fill(
            "q={question} s={schema_context}",
            &[("question", "how many"), ("schema_context", "CREATE TABLE x")],
        );
        assert_eq!(out, "q=how many s=CREATE TABLE x");
    }

    #[test]
    fn test_generator_system_prompt_keeps_clinical_heuristics() {
        assert!(GENERATOR_SYSTEM_PROMPT.contains("three-letter codes"));
        assert!(GENERATOR_SYSTEM_PROMPT.contains("'JPN'"));
        assert!(GENERATOR_SYSTEM_PROMPT.contains("subject_level_metric"));
    }

    #[test]
    fn test_strategy_prompts_have_required_slots() {
        for template in [DIRECT_SQL_PROMPT, COT_SQL_PROMPT, DECOMPOSITION_SQL_PROMPT] {
            assert!(template.contains("{schema_context}"));
            assert!(template.contains("{question}"));
            assert!(template.contains("{entity_block}"));
        }
        assert!(REVISE_PROMPT.contains("{error}"));
    }
}
