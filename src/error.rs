use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    /// No dataset has been persisted yet.
    #[error("Table '{0}' does not exist in database. Please upload a CSV file first.")]
    MissingTable(String),

    #[error("SQL execution error: {0}")]
    MalformedQuery(String),

    #[error("Generated SQL rejected: {0}")]
    TranslationRejected(String),

    #[error("In-memory fallback unavailable: {0}")]
    FallbackUnavailable(String),

    /// Both the store and the in-memory evaluator failed for the same query.
    #[error("{store}; fallback: {fallback}")]
    ExecutionFailed {
        store: Box<CopilotError>,
        fallback: Box<CopilotError>,
    },

    #[error("LLM error: {0}")]
    ExternalService(String),

    #[error("LLM request timed out after {0}s")]
    RequestTimeout(u64),

    #[error("Aggregation unavailable: {0}")]
    AggregationUnavailable(String),

    #[error("Dataset is empty")]
    EmptyDataset,

    #[error("Query returned no rows")]
    EmptyResult,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl CopilotError {
    /// Short message suitable for showing to the person who asked the question.
    /// Low-level detail stays in the `Display` output for logs.
    pub fn user_message(&self) -> String {
        match self {
            CopilotError::MissingTable(_) => "no data has been uploaded yet".to_string(),
            CopilotError::MalformedQuery(_) => "the generated query could not be executed".to_string(),
            CopilotError::TranslationRejected(_) => "could not generate a read-only SQL query from the question".to_string(),
            CopilotError::FallbackUnavailable(_) => "the in-memory query engine could not answer".to_string(),
            CopilotError::ExecutionFailed { store, .. } => store.user_message(),
            CopilotError::ExternalService(_) => "the language model service is unavailable".to_string(),
            CopilotError::RequestTimeout(secs) => format!("the language model did not respond within {}s", secs),
            CopilotError::AggregationUnavailable(msg) => msg.clone(),
            CopilotError::EmptyDataset => "the uploaded dataset has no rows".to_string(),
            CopilotError::EmptyResult => "the query returned no rows".to_string(),
            CopilotError::Database(_) => "the database is unavailable".to_string(),
            CopilotError::Config(msg) => msg.clone(),
            CopilotError::Io(_) | CopilotError::Json(_) | CopilotError::Polars(_) => self.to_string(),
        }
    }

    pub fn is_missing_table(&self) -> bool {
        matches!(self, CopilotError::MissingTable(_))
    }
}

impl From<polars::error::PolarsError> for CopilotError {
    fn from(err: polars::error::PolarsError) -> Self {
        CopilotError::Polars(err.to_string())
    }
}

impl From<rusqlite::Error> for CopilotError {
    fn from(err: rusqlite::Error) -> Self {
        CopilotError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CopilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failure_keeps_both_details() {
        let err = CopilotError::ExecutionFailed {
            store: Box::new(CopilotError::Database("unable to open database file".to_string())),
            fallback: Box::new(CopilotError::FallbackUnavailable("no dataset".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("unable to open database file"));
        assert!(text.contains("no dataset"));
        assert_eq!(err.user_message(), "the database is unavailable");
    }

    #[test]
    fn test_missing_table_is_named() {
        let err = CopilotError::MissingTable("campaign_data".to_string());
        assert!(err.is_missing_table());
        assert!(err.to_string().contains("upload a CSV file first"));
    }
}
