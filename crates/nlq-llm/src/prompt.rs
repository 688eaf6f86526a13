//! Prompt assembly
//!
//! Renders the schema subset and question into a bounded instruction
//! payload. When everything fits under the token budget the whole schema is
//! included; otherwise tables are ranked by lexical overlap with the
//! question and added until the budget runs out.

use nlq_core::Dialect;
use nlq_core::types::ColumnMeta;
use nlq_schema::model::SchemaSnapshot;

const SQL_GENERATION_SYSTEM_PROMPT: &str = r#"You are an expert SQL engineer.

Convert the user's natural language question into a single SQL query for the
named dialect.

## Rules:
1. ONLY generate a single read-only SELECT query (WITH ... SELECT is fine)
2. NEVER generate INSERT, UPDATE, DELETE, DROP, CREATE, ALTER, or any other
   DDL/DML statement
3. Use syntax and functions valid for the stated dialect
4. Use explicit table aliases for clarity
5. Include a LIMIT clause for potentially large result sets
6. Handle NULL values appropriately
7. Use aggregation functions (COUNT, SUM, AVG, ...) when the question asks
   for totals or counts

## Output Format:
Return ONLY the SQL query wrapped in a ```sql ... ``` code block.
Do not include any explanation before or after the SQL."#;

const RESULT_JUDGE_SYSTEM_PROMPT: &str = r#"You are a SQL query result validator. Evaluate whether the query results answer the user's original question.

Analyze:
1. Does the SQL correctly interpret the user's intent?
2. Do the results make sense given the question?
3. Are the column names and types appropriate for the question?
4. Does the result set size seem reasonable?

Return a JSON object with:
{
  "confidence": <0-100 integer>,
  "explanation": "<brief explanation>",
  "concerns": ["<specific concern>", ...]
}

Confidence levels:
- 90-100: results clearly answer the question
- 70-89: results likely answer it, minor uncertainties
- 50-69: significant concerns or ambiguities
- 0-49: results likely do not answer the question

Be concise. Focus on semantic correctness, not formatting."#;

/// A fully assembled prompt pair.
#[derive(Debug, Clone)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

/// Feedback from a refused attempt, prepended on the remediation cycle.
#[derive(Debug, Clone)]
pub struct RemediationHint {
    pub previous_sql: String,
    pub error: String,
}

pub struct PromptAssembler {
    token_budget: usize,
}

impl PromptAssembler {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    /// Build the SQL-generation prompt.
    pub fn generation(
        &self,
        question: &str,
        snapshot: &SchemaSnapshot,
        dialect: Dialect,
        hints: Option<&str>,
        remediation: Option<&RemediationHint>,
    ) -> GenerationPrompt {
        let mut parts: Vec<String> = Vec::new();

        parts.push(format!("## Dialect:\n{dialect}"));
        parts.push(format!(
            "## Database Schema:\n{}",
            self.schema_context(question, snapshot)
        ));

        if let Some(hints) = hints {
            parts.push(format!("## Additional Context:\n{hints}"));
        }

        if let Some(hint) = remediation {
            parts.push(format!(
                "## Previous Attempt (Failed):\n```sql\n{}\n```\nError: {}\nPlease fix the issue and generate a correct query.",
                hint.previous_sql, hint.error
            ));
        }

        parts.push(format!("## Question:\n{question}"));

        GenerationPrompt {
            system: SQL_GENERATION_SYSTEM_PROMPT.to_string(),
            user: parts.join("\n\n"),
        }
    }

    /// Build the result-judging prompt from a sample of the rows.
    pub fn judge(
        &self,
        question: &str,
        sql: &str,
        columns: &[ColumnMeta],
        rows: &[Vec<serde_json::Value>],
        total_rows: usize,
        sample_rows: usize,
    ) -> GenerationPrompt {
        let sample: Vec<serde_json::Value> = rows
            .iter()
            .take(sample_rows)
            .map(|row| {
                let object: serde_json::Map<String, serde_json::Value> = columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, cell)| (col.name.clone(), cell.clone()))
                    .collect();
                serde_json::Value::Object(object)
            })
            .collect();

        let preview =
            serde_json::to_string_pretty(&sample).unwrap_or_else(|_| "[]".to_string());

        let user = format!(
            "## Original Question:\n{question}\n\n## Executed SQL:\n```sql\n{sql}\n```\n\n## Results (showing {} of {total_rows} rows):\n```json\n{preview}\n```\n\nEvaluate whether the results answer the question and reply with the JSON object.",
            sample.len()
        );

        GenerationPrompt {
            system: RESULT_JUDGE_SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    /// Render the schema, trimming to the most relevant tables when the full
    /// rendering would blow the token budget.
    fn schema_context(&self, question: &str, snapshot: &SchemaSnapshot) -> String {
        let full = snapshot.to_prompt_context();
        if approx_tokens(&full) <= self.token_budget {
            return full;
        }

        let question_terms = terms(question);
        let mut ranked: Vec<(usize, String)> = snapshot
            .tables()
            .map(|(schema, table)| {
                let rendered = SchemaSnapshot::render_table(schema, table);
                let mut score = overlap(&question_terms, &table.name);
                for col in &table.columns {
                    score += overlap(&question_terms, &col.name);
                }
                if let Some(comment) = &table.comment {
                    score += overlap(&question_terms, comment);
                }
                (score, rendered)
            })
            .collect();

        // Highest score first; stable for equal scores so the alphabetical
        // snapshot order breaks ties deterministically
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let mut out = String::new();
        let mut used = 0;
        for (_, rendered) in ranked {
            let cost = approx_tokens(&rendered);
            if used + cost > self.token_budget && !out.is_empty() {
                break;
            }
            used += cost;
            out.push_str(&rendered);
            out.push('\n');
        }
        out
    }
}

/// Rough token estimate: four characters per token.
fn approx_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

/// How many of the question's terms appear in the candidate text.
fn overlap(question_terms: &[String], candidate: &str) -> usize {
    let candidate = candidate.to_lowercase();
    question_terms
        .iter()
        .filter(|t| candidate.contains(t.as_str()))
        .count()
}
