//! Orchestrator / Router
//!
//! classify -> (Retrieval) translate -> execute -> table
//!          -> (Analysis, or any Retrieval failure) assemble context -> narrative
//!
//! At most two external calls per question: the translator and the narrative
//! generator, each bounded by the request timeout. Store and polars work runs on
//! the blocking pool so a question never stalls the async workers.

use crate::classifier::{QueryClass, QueryClassifier};
use crate::context::ContextAssembler;
use crate::dataset::CampaignDataset;
use crate::error::{CopilotError, Result};
use crate::execution::executor::QueryExecutor;
use crate::execution::result::QueryResult;
use crate::llm::TextGenerator;
use crate::narrative::NarrativeGenerator;
use crate::translator::QueryTranslator;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub request_timeout: Duration,
    pub sample_rows: usize,
    pub top_campaigns: usize,
    pub breakdown_limit: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            sample_rows: 3,
            top_campaigns: 5,
            breakdown_limit: 25,
        }
    }
}

/// Which path produced the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerRoute {
    StructuredQuery,
    Narrative,
    NarrativeFallback,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub request_id: String,
    pub classification: QueryClass,
    pub route: AnswerRoute,
    /// Markdown table or narrative; `None` only when every path failed
    pub text: Option<String>,
    pub error: Option<String>,
    pub sql: Option<String>,
    #[serde(skip)]
    pub result: Option<QueryResult>,
}

impl Answer {
    /// Whichever of text or error is present
    pub fn display_text(&self) -> &str {
        self.text.as_deref().or(self.error.as_deref()).unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        self.text.is_some()
    }
}

pub struct QueryRouter {
    classifier: QueryClassifier,
    translator: QueryTranslator,
    executor: Arc<QueryExecutor>,
    assembler: Arc<ContextAssembler>,
    narrative: NarrativeGenerator,
    settings: RouterSettings,
}

impl QueryRouter {
    pub fn new(executor: QueryExecutor, generator: Arc<dyn TextGenerator>, settings: RouterSettings) -> Self {
        let translator = QueryTranslator::new(generator.clone(), executor.table_name()).with_sample_rows(settings.sample_rows);
        let assembler = ContextAssembler::new()
            .with_top_n(settings.top_campaigns)
            .with_breakdown_limit(settings.breakdown_limit);
        Self {
            classifier: QueryClassifier::new(),
            translator,
            executor: Arc::new(executor),
            assembler: Arc::new(assembler),
            narrative: NarrativeGenerator::new(generator),
            settings,
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    pub async fn answer(&self, question: &str, dataset: &CampaignDataset) -> Answer {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("question", request_id = %request_id);
        self.route(question, dataset, request_id.clone()).instrument(span).await
    }

    async fn route(&self, question: &str, dataset: &CampaignDataset, request_id: String) -> Answer {
        let classification = self.classifier.classify(question);
        info!("Question classified as {}", classification);

        let mut answer = Answer {
            request_id,
            classification,
            route: AnswerRoute::Failed,
            text: None,
            error: None,
            sql: None,
            result: None,
        };

        if classification == QueryClass::Analysis {
            match self.narrate(question, dataset).await {
                Ok(text) => {
                    answer.route = AnswerRoute::Narrative;
                    answer.text = Some(text);
                }
                Err(e) => {
                    warn!("Narrative generation failed: {}", e);
                    answer.error = Some(e.user_message());
                }
            }
            return answer;
        }

        let structured_err = match self.structured(question, dataset, &mut answer.sql).await {
            Ok(result) => {
                info!("Answered by structured query ({} rows, {})", result.row_count, result.source);
                answer.route = AnswerRoute::StructuredQuery;
                answer.text = Some(result.to_markdown());
                answer.result = Some(result);
                return answer;
            }
            Err(e) => e,
        };

        warn!("Structured path failed, falling back to narrative: {}", structured_err);
        let reason = structured_err.user_message();
        match self.narrate(question, dataset).await {
            Ok(text) => {
                answer.route = AnswerRoute::NarrativeFallback;
                answer.text = Some(format!(
                    "> Note: Direct SQL query failed ({}), using AI analysis instead.\n\n{}",
                    reason, text
                ));
            }
            Err(e) => {
                warn!("Narrative fallback failed: {}", e);
                answer.error = Some(format!(
                    "SQL query failed: {}. LLM also failed: {}",
                    reason,
                    e.user_message()
                ));
            }
        }
        answer
    }

    async fn structured(
        &self,
        question: &str,
        dataset: &CampaignDataset,
        sql_slot: &mut Option<String>,
    ) -> Result<QueryResult> {
        let executor = self.executor.clone();
        let snapshot = dataset.clone();
        let sample_rows = self.settings.sample_rows;
        let (schema, sample) = blocking(move || {
            Ok((
                schema_text(&executor, &snapshot),
                sample_text(&executor, &snapshot, sample_rows),
            ))
        })
        .await?;

        let sql = self
            .bounded(self.translator.translate(question, &schema, &sample))
            .await?;
        *sql_slot = Some(sql.clone());

        let executor = self.executor.clone();
        let frame = dataset.frame().clone();
        let result = blocking(move || executor.execute(&sql, Some(&frame))).await?;
        if result.is_empty() {
            return Err(CopilotError::EmptyResult);
        }
        Ok(result)
    }

    async fn narrate(&self, question: &str, dataset: &CampaignDataset) -> Result<String> {
        let executor = self.executor.clone();
        let assembler = self.assembler.clone();
        let snapshot = dataset.clone();
        let summary = blocking(move || Ok(assembler.assemble(&snapshot, &executor))).await?;
        self.bounded(self.narrative.generate(question, &summary)).await
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.settings.request_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CopilotError::RequestTimeout(limit.as_secs()))?
    }
}

/// Run store or polars work on the blocking pool, inside the current span
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(work))
        .await
        .map_err(|e| CopilotError::Database(format!("Blocking task failed: {}", e)))?
}

/// Store schema with mapping comments; derived from the dataset when the store can't describe it
fn schema_text(executor: &QueryExecutor, dataset: &CampaignDataset) -> String {
    if let Some(store) = executor.store() {
        match store.describe_schema() {
            Ok(schema) => return format!("{}\n\n{}", schema, dataset.mapping().comment_lines()),
            Err(e) => warn!("Store schema unavailable, deriving from dataset: {}", e),
        }
    }
    dataset.schema_text(executor.table_name())
}

fn sample_text(executor: &QueryExecutor, dataset: &CampaignDataset, rows: usize) -> String {
    if let Some(store) = executor.store() {
        match store.sample_rows(rows) {
            Ok(sample) => return sample,
            Err(e) => warn!("Store sample unavailable, sampling dataset: {}", e),
        }
    }
    dataset.sample_text(rows)
}
