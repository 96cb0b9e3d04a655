//! Query Translator
//!
//! Natural-language question to a single read-only SQL statement via the text
//! generator. One attempt per call; the router decides what to do on rejection.
//! Model output is untrusted: it must start with SELECT and, when it parses,
//! be exactly one query statement.

use crate::error::{CopilotError, Result};
use crate::llm::{GenerationRequest, TextGenerator};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?i)```sql\s*").expect("valid sql fence pattern");
    static ref ANY_FENCE: Regex = Regex::new(r"```\s*").expect("valid fence pattern");
}

pub struct QueryTranslator {
    generator: Arc<dyn TextGenerator>,
    table: String,
    sample_rows: usize,
}

impl QueryTranslator {
    pub fn new(generator: Arc<dyn TextGenerator>, table: impl Into<String>) -> Self {
        Self {
            generator,
            table: table.into(),
            sample_rows: 3,
        }
    }

    pub fn with_sample_rows(mut self, n: usize) -> Self {
        self.sample_rows = n;
        self
    }

    /// Build the generation request for a question
    pub fn build_request(&self, question: &str, schema: &str, sample: &str) -> GenerationRequest {
        let system = format!(
            r#"You are a SQL query generator. Convert the user's question into a SQL query.

IMPORTANT RULES:
1. Generate ONLY a valid SQL SELECT query, nothing else
2. Use the exact column names from the schema (case-sensitive), double-quoted
3. Use the table name "{table}" in your query
4. Do NOT include any explanations, comments, or markdown formatting
5. Use standard SQL syntax compatible with SQLite
6. For aggregations, use appropriate functions (SUM, COUNT, AVG, etc.)
7. For filtering, use WHERE clauses
8. For grouping, use GROUP BY
9. For ordering, use ORDER BY
10. Return ONLY the SQL query, no other text"#,
            table = self.table
        );
        let context = format!(
            "Database Schema:\n{}\n\nSample Data (first {} rows):\n{}",
            schema, self.sample_rows, sample
        );
        GenerationRequest::new(system, context, question)
    }

    /// Translate a question. `TranslationRejected` when the model output fails validation.
    pub async fn translate(&self, question: &str, schema: &str, sample: &str) -> Result<String> {
        info!("Generating SQL for question");
        let request = self.build_request(question, schema, sample);
        let raw = self.generator.generate(&request).await?;
        debug!("Raw model output: {}", raw.chars().take(200).collect::<String>());

        let sql = clean_generated_sql(&raw);
        validate_read_only(&sql)?;
        info!("Generated SQL: {}", sql);
        Ok(sql)
    }
}

/// Strip code fences, surrounding whitespace, and trailing semicolons
pub fn clean_generated_sql(raw: &str) -> String {
    let sql = SQL_FENCE.replace_all(raw, "");
    let sql = ANY_FENCE.replace_all(&sql, "");
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

/// Read-only gate for generated SQL
pub fn validate_read_only(sql: &str) -> Result<()> {
    let starts_with_select = sql
        .get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("select"))
        .unwrap_or(false);
    if !starts_with_select {
        warn!("Rejected generated SQL: does not start with SELECT");
        return Err(CopilotError::TranslationRejected(
            "output does not start with SELECT".to_string(),
        ));
    }

    // SQLite accepts syntax sqlparser doesn't; an unparsable SELECT is left to the
    // read-only connection and statement check in the store.
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => {
            if statements.len() != 1 {
                warn!("Rejected generated SQL: {} statements", statements.len());
                return Err(CopilotError::TranslationRejected(format!(
                    "expected one statement, found {}",
                    statements.len()
                )));
            }
            if !matches!(statements[0], Statement::Query(_)) {
                warn!("Rejected generated SQL: not a query");
                return Err(CopilotError::TranslationRejected("statement is not a query".to_string()));
            }
        }
        Err(e) => debug!("sqlparser could not parse generated SQL ({}); relying on store checks", e),
    }
    Ok(())
}
