//! In-memory evaluator (best effort)
//!
//! Evaluates query text against the raw dataframe with polars' SQL context. It
//! supports a narrower dialect than SQLite; anything it can't handle comes back
//! as `FallbackUnavailable` instead of propagating a panic.

use crate::error::{CopilotError, Result};
use crate::execution::result::{QueryResult, ResultSource};
use polars::prelude::*;
use polars::sql::SQLContext;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Evaluates SQL over a dataframe registered under the store's table name
#[derive(Debug, Clone)]
pub struct InMemoryEvaluator {
    table: String,
}

impl InMemoryEvaluator {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn evaluate(&self, sql: &str, frame: &DataFrame) -> Result<QueryResult> {
        let start = Instant::now();
        info!("Evaluating query in memory over {} rows", frame.height());
        debug!("In-memory SQL: {}", sql);

        let table = self.table.clone();
        let lazy = frame.clone().lazy();
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            let mut ctx = SQLContext::new();
            ctx.register(&table, lazy);
            ctx.execute(sql).and_then(|lf| lf.collect())
        }));

        let collected = match outcome {
            Ok(Ok(df)) => df,
            Ok(Err(e)) => {
                warn!("In-memory evaluation failed: {}", e);
                return Err(CopilotError::FallbackUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!("In-memory evaluator panicked on query");
                return Err(CopilotError::FallbackUnavailable(
                    "query construct not supported by the in-memory engine".to_string(),
                ));
            }
        };

        let elapsed = start.elapsed().as_millis() as u64;
        let mut result = QueryResult::from_frame(&collected, ResultSource::InMemory, elapsed)
            .map_err(|e| CopilotError::FallbackUnavailable(e.to_string()))?;
        result
            .warnings
            .push("Answered by the in-memory engine - limited SQL support".to_string());
        Ok(result)
    }
}
