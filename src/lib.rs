pub mod classifier;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod llm;
pub mod mapping;
pub mod metrics;
pub mod narrative;
pub mod router;
pub mod store;
pub mod translator;

pub use classifier::{QueryClass, QueryClassifier};
pub use config::CopilotConfig;
pub use context::{CampaignPerformance, ContextAssembler, ContextSummary, DateSpan};
pub use dataset::CampaignDataset;
pub use error::{CopilotError, Result};
pub use execution::{QueryExecutor, QueryResult, ResultSource};
pub use llm::{GenerationRequest, LlmClient, TextGenerator};
pub use mapping::{ColumnMapping, LogicalField};
pub use metrics::{MetricDefinition, MetricRegistry};
pub use narrative::NarrativeGenerator;
pub use router::{Answer, AnswerRoute, QueryRouter, RouterSettings};
pub use store::{SqliteStore, TabularStore, DEFAULT_TABLE};
pub use translator::QueryTranslator;
