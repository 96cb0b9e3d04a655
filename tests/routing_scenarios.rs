mod common;

use ads_copilot::{
    AnswerRoute, ContextSummary, CopilotError, LogicalField, QueryClass, QueryExecutor, QueryResult, QueryRouter,
    ResultSource, RouterSettings, SqliteStore, TabularStore,
};
use common::{campaign_dataset, ScriptedGenerator, Step};
use polars::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TOTAL_CLICKS_SQL: &str = "```sql\nSELECT SUM(\"Clicks\") AS total_clicks FROM campaign_data\n```";

/// Store whose every operation faults, standing in for an unreachable database
struct UnreachableStore;

impl TabularStore for UnreachableStore {
    fn table_name(&self) -> &str {
        "campaign_data"
    }
    fn store_table(&self, _frame: &DataFrame) -> ads_copilot::Result<usize> {
        Err(CopilotError::Database("unable to open database file".to_string()))
    }
    fn run_query(&self, _sql: &str) -> ads_copilot::Result<QueryResult> {
        Err(CopilotError::Database("unable to open database file".to_string()))
    }
    fn describe_schema(&self) -> ads_copilot::Result<String> {
        Err(CopilotError::Database("unable to open database file".to_string()))
    }
    fn sample_rows(&self, _n: usize) -> ads_copilot::Result<String> {
        Err(CopilotError::Database("unable to open database file".to_string()))
    }
}

/// Store that still holds an earlier upload and faults on every replace
struct StaleStore(SqliteStore);

impl TabularStore for StaleStore {
    fn table_name(&self) -> &str {
        self.0.table_name()
    }
    fn store_table(&self, _frame: &DataFrame) -> ads_copilot::Result<usize> {
        Err(CopilotError::Database("database or disk is full".to_string()))
    }
    fn run_query(&self, sql: &str) -> ads_copilot::Result<QueryResult> {
        self.0.run_query(sql)
    }
    fn describe_schema(&self) -> ads_copilot::Result<String> {
        self.0.describe_schema()
    }
    fn sample_rows(&self, n: usize) -> ads_copilot::Result<String> {
        self.0.sample_rows(n)
    }
}

fn stored_executor(dir: &TempDir) -> QueryExecutor {
    let store = Arc::new(SqliteStore::open(dir.path().join("copilot.db")).unwrap());
    store.store_table(campaign_dataset().frame()).unwrap();
    QueryExecutor::new(store)
}

fn router(executor: QueryExecutor, generator: Arc<ScriptedGenerator>) -> QueryRouter {
    QueryRouter::new(executor, generator, RouterSettings::default())
}

fn true_click_sum() -> f64 {
    campaign_dataset().column_sum(LogicalField::Clicks).unwrap()
}

#[tokio::test]
async fn test_total_clicks_answered_from_store() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::replies(&[TOTAL_CLICKS_SQL]));
    let router = router(stored_executor(&dir), generator.clone());

    let answer = router.answer("How many total clicks?", &campaign_dataset()).await;

    assert_eq!(answer.classification, QueryClass::Retrieval);
    assert_eq!(answer.route, AnswerRoute::StructuredQuery);
    assert_eq!(answer.error, None);
    let result = answer.result.as_ref().unwrap();
    assert_eq!(result.source, ResultSource::Store);
    assert_eq!(result.scalar_f64(), Some(true_click_sum()));
    assert_eq!(answer.display_text(), "| total_clicks |\n|:---|\n| 160 |");
    assert_eq!(generator.calls(), 1);

    let request = &generator.requests()[0];
    assert!(request.context.contains("CREATE TABLE campaign_data ("));
    assert!(request.context.contains("-- clicks -> Clicks"));
}

#[tokio::test]
async fn test_analysis_question_grounded_on_true_aggregates() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::replies(&["Alpha spends more per click than Beta."]));
    let router = router(stored_executor(&dir), generator.clone());
    let dataset = campaign_dataset();

    let answer = router.answer("Why is campaign Alpha underperforming?", &dataset).await;

    assert_eq!(answer.classification, QueryClass::Analysis);
    assert_eq!(answer.route, AnswerRoute::Narrative);
    assert_eq!(answer.display_text(), "Alpha spends more per click than Beta.");
    assert_eq!(generator.calls(), 1);

    let request = &generator.requests()[0];
    assert_eq!(request.question, "Why is campaign Alpha underperforming?");
    let json = request
        .context
        .strip_prefix("Campaign Performance Summary (JSON):\n")
        .unwrap();
    let summary: ContextSummary = serde_json::from_str(json).unwrap();
    assert_eq!(summary.totals.get(&LogicalField::Clicks), Some(&160.0));
    assert_eq!(summary.totals.get(&LogicalField::Cost), Some(&310.0));
    assert_eq!(summary.totals.get(&LogicalField::Impressions), Some(&4500.0));
    assert_eq!(summary.metrics.get("CTR"), Some(&3.56));
    assert!(!summary.metrics.contains_key("ROAS"));

    let alpha = &summary.campaign_breakdown[0];
    assert_eq!(alpha.campaign, "Alpha");
    assert_eq!(alpha.get("cost"), Some(160.0));
    assert_eq!(alpha.get("cpc"), Some(2.0));
    assert_eq!(alpha.get("revenue"), None);
    assert_eq!(summary.campaign_breakdown_error, None);
}

#[tokio::test]
async fn test_unreachable_store_falls_back_to_in_memory() {
    let generator = Arc::new(ScriptedGenerator::replies(&[TOTAL_CLICKS_SQL]));
    let router = router(QueryExecutor::new(Arc::new(UnreachableStore)), generator.clone());

    let answer = router.answer("How many total clicks?", &campaign_dataset()).await;

    assert_eq!(answer.route, AnswerRoute::StructuredQuery);
    let result = answer.result.as_ref().unwrap();
    assert_eq!(result.source, ResultSource::InMemory);
    assert_eq!(result.scalar_f64(), Some(true_click_sum()));
    assert_eq!(generator.calls(), 1);

    // Schema came from the dataset because the store couldn't describe itself
    let request = &generator.requests()[0];
    assert!(request.context.contains("-- Standard name: clicks"));
}

#[tokio::test]
async fn test_destructive_translation_is_never_executed() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("copilot.db")).unwrap());
    store.store_table(campaign_dataset().frame()).unwrap();
    let generator = Arc::new(ScriptedGenerator::replies(&[
        "DROP TABLE campaign_data",
        "Here is an overview of your campaigns.",
    ]));
    let router = router(QueryExecutor::new(store.clone()), generator.clone());

    let answer = router.answer("Show all campaigns", &campaign_dataset()).await;

    assert_eq!(answer.route, AnswerRoute::NarrativeFallback);
    assert_eq!(answer.sql, None);
    assert_eq!(
        answer.display_text(),
        "> Note: Direct SQL query failed (could not generate a read-only SQL query from the question), \
         using AI analysis instead.\n\nHere is an overview of your campaigns."
    );
    assert_eq!(generator.calls(), 2);

    let count = store.run_query("SELECT COUNT(*) FROM campaign_data").unwrap();
    assert_eq!(count.scalar_f64(), Some(3.0));
}

#[tokio::test]
async fn test_failing_query_then_failing_narrative_reports_both() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::new(vec![
        Step::Reply("SELECT no_such_column FROM campaign_data".to_string()),
        Step::Fail("quota exceeded".to_string()),
    ]));
    let router = router(stored_executor(&dir), generator.clone());

    let answer = router.answer("List the campaigns", &campaign_dataset()).await;

    assert_eq!(answer.route, AnswerRoute::Failed);
    assert_eq!(answer.text, None);
    assert_eq!(
        answer.error.as_deref(),
        Some(
            "SQL query failed: the generated query could not be executed. \
             LLM also failed: the language model service is unavailable"
        )
    );
    assert_eq!(answer.sql.as_deref(), Some("SELECT no_such_column FROM campaign_data"));
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_hung_model_times_out() {
    let generator = Arc::new(ScriptedGenerator::new(vec![Step::Hang]));
    let settings = RouterSettings {
        request_timeout: Duration::from_secs(1),
        ..RouterSettings::default()
    };
    let router = QueryRouter::new(QueryExecutor::in_memory(), generator.clone(), settings);

    let answer = router.answer("Recommend where to move budget", &campaign_dataset()).await;

    assert_eq!(answer.route, AnswerRoute::Failed);
    assert_eq!(
        answer.error.as_deref(),
        Some("the language model did not respond within 1s")
    );
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_quoted_missing_column_is_never_answered() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(ScriptedGenerator::replies(&[
        "SELECT SUM(\"Revenue\") AS total_revenue FROM campaign_data",
        "Revenue is not tracked in this dataset.",
    ]));
    let router = router(stored_executor(&dir), generator.clone());

    let answer = router.answer("What is the total revenue?", &campaign_dataset()).await;

    assert_eq!(answer.classification, QueryClass::Retrieval);
    assert_eq!(answer.route, AnswerRoute::NarrativeFallback);
    assert!(answer.result.is_none());
    assert_eq!(
        answer.display_text(),
        "> Note: Direct SQL query failed (the generated query could not be executed), \
         using AI analysis instead.\n\nRevenue is not tracked in this dataset."
    );
    assert_eq!(
        answer.sql.as_deref(),
        Some("SELECT SUM(\"Revenue\") AS total_revenue FROM campaign_data")
    );
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_failed_reupload_answers_from_current_dataset() {
    let dir = TempDir::new().unwrap();
    let previous = SqliteStore::open(dir.path().join("copilot.db")).unwrap();
    let earlier = df!(
        "Impressions" => [10i64],
        "Clicks" => [999i64],
        "Cost" => [1.0],
        "Campaign" => ["Old"]
    )
    .unwrap();
    previous.store_table(&earlier).unwrap();

    let dataset = campaign_dataset();
    let executor = QueryExecutor::for_upload(Arc::new(StaleStore(previous)), dataset.frame());
    assert!(executor.store().is_none());

    let generator = Arc::new(ScriptedGenerator::replies(&[TOTAL_CLICKS_SQL]));
    let answer = router(executor, generator.clone()).answer("How many total clicks?", &dataset).await;

    assert_eq!(answer.route, AnswerRoute::StructuredQuery);
    let result = answer.result.as_ref().unwrap();
    assert_eq!(result.source, ResultSource::InMemory);
    assert_eq!(result.scalar_f64(), Some(true_click_sum()));
    assert!(!generator.requests()[0].context.contains("999"));
}
