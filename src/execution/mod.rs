//! Execution Module - runs read-only queries against the campaign table
//!
//! - QueryExecutor tries the persisted store first
//! - InMemoryEvaluator answers the same query over the session's dataframe when the store can't
//! - QueryResult is the common shape both paths return

pub mod executor;
pub mod fallback;
pub mod result;

pub use executor::QueryExecutor;
pub use fallback::InMemoryEvaluator;
pub use result::{CellValue, QueryResult, ResultSource};
