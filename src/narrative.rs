//! Narrative Generator
//!
//! Free-text analysis grounded on a [`ContextSummary`]. The model only ever sees
//! the summary JSON, and the instructions forbid numbers that aren't in it.

use crate::context::ContextSummary;
use crate::error::Result;
use crate::llm::{GenerationRequest, TextGenerator};
use std::sync::Arc;
use tracing::info;

const ANALYST_INSTRUCTIONS: &str = r#"You are an advertising performance analyst assistant. Use only the data provided. campaign_breakdown is SQL-aggregated and is the source of truth for per-campaign figures.

Write a clean, readable markdown answer (no code fences or inline JSON). Use consistent spacing and simple bullets. Structure:
- Title line summarizing the user ask (plain text).
- Overall Snapshot: 4-6 bullets. Each bullet starts with a bold label (e.g. **Date Range:**, **Totals:**, **Efficiency:**, **Volume:**) followed by a short sentence.
- KPI Table: a small markdown table with headers ROAS | CTR% | CVR% | CPC | CPA | Cost | Revenue | Conversions | Clicks | Impressions.
- Campaign Breakdown: for each campaign in campaign_breakdown order, a bullet with the campaign name in bold, then 3-5 sub-bullets covering cost, revenue, conversions, CTR, CPC, CPA, ROAS, CVR, plus one Insight sentence and one Next steps sentence (both metric-backed).

Grounding rules:
- Every number you write must appear in the summary or be a rounding of one.
- If a metric or field is missing from the summary, write 'n/a' instead of estimating it.
- Never invent campaigns that are not in all_campaign_names.

Style rules:
- Plain markdown only; no italics or code fences.
- Round numbers to 2 decimals; use thousands separators for large numbers (e.g. 12,345.67).
- One short sentence per bullet or sub-bullet."#;

pub struct NarrativeGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl NarrativeGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn build_request(&self, question: &str, summary: &ContextSummary) -> Result<GenerationRequest> {
        let context = format!("Campaign Performance Summary (JSON):\n{}", summary.to_json()?);
        Ok(GenerationRequest::new(ANALYST_INSTRUCTIONS, context, question))
    }

    pub async fn generate(&self, question: &str, summary: &ContextSummary) -> Result<String> {
        let request = self.build_request(question, summary)?;
        info!("Requesting narrative analysis ({} campaigns in breakdown)", summary.campaign_breakdown.len());
        let text = self.generator.generate(&request).await?;
        Ok(text.trim().to_string())
    }
}
