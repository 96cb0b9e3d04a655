//! Query Executor
//!
//! Try-Store, then Try-InMemory, then report. The store is the source of truth;
//! the in-memory evaluator only runs when the store faults or holds no table.

use crate::error::{CopilotError, Result};
use crate::execution::fallback::InMemoryEvaluator;
use crate::execution::result::QueryResult;
use crate::store::{TabularStore, DEFAULT_TABLE};
use polars::prelude::DataFrame;
use std::sync::Arc;
use tracing::{info, warn};

pub struct QueryExecutor {
    store: Option<Arc<dyn TabularStore>>,
    evaluator: InMemoryEvaluator,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn TabularStore>) -> Self {
        let evaluator = InMemoryEvaluator::new(store.table_name());
        Self {
            store: Some(store),
            evaluator,
        }
    }

    /// Executor with no persisted store; every query goes to the in-memory evaluator
    pub fn in_memory() -> Self {
        Self::in_memory_as(DEFAULT_TABLE)
    }

    fn in_memory_as(table: &str) -> Self {
        Self {
            store: None,
            evaluator: InMemoryEvaluator::new(table),
        }
    }

    /// Persist `frame` and read it back through `store`. If the upload is rejected the
    /// store still holds an earlier dataset, so queries are answered from memory instead.
    pub fn for_upload(store: Arc<dyn TabularStore>, frame: &DataFrame) -> Self {
        match store.store_table(frame) {
            Ok(rows) => {
                info!("Persisted {} rows to {}", rows, store.table_name());
                Self::new(store)
            }
            Err(e) => {
                warn!("Could not persist dataset, answering from memory: {}", e);
                Self::in_memory_as(store.table_name())
            }
        }
    }

    pub fn table_name(&self) -> &str {
        self.evaluator.table_name()
    }

    pub fn store(&self) -> Option<&Arc<dyn TabularStore>> {
        self.store.as_ref()
    }

    /// Run a read-only query. `fallback` is the raw dataset used when the store fails.
    pub fn execute(&self, sql: &str, fallback: Option<&DataFrame>) -> Result<QueryResult> {
        let sql = sql.trim();
        if !is_select(sql) {
            return Err(CopilotError::MalformedQuery(
                "only SELECT statements can be executed".to_string(),
            ));
        }

        let store_err = match &self.store {
            Some(store) => match store.run_query(sql) {
                Ok(result) => {
                    info!("Store answered with {} rows", result.row_count);
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Store query failed, trying in-memory fallback: {}", e);
                    e
                }
            },
            None => CopilotError::Database("persisted store is disabled".to_string()),
        };

        let fallback_result = match fallback {
            Some(frame) => self.evaluator.evaluate(sql, frame),
            None => Err(CopilotError::FallbackUnavailable(
                "no in-memory dataset supplied".to_string(),
            )),
        };

        match fallback_result {
            Ok(mut result) => {
                info!("In-memory fallback answered with {} rows", result.row_count);
                result
                    .warnings
                    .push(format!("Store unavailable ({}); used in-memory data", store_err.user_message()));
                Ok(result)
            }
            Err(fallback_err) => {
                warn!("In-memory fallback failed: {}", fallback_err);
                Err(CopilotError::ExecutionFailed {
                    store: Box::new(store_err),
                    fallback: Box::new(fallback_err),
                })
            }
        }
    }
}

fn is_select(sql: &str) -> bool {
    sql.get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}
