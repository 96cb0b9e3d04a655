//! Context Assembler
//!
//! Builds the bounded, deterministic summary the narrative generator is grounded
//! on. Every map is a BTreeMap and every list has a total order, so two builds
//! over the same dataset serialize to identical bytes.

use crate::dataset::CampaignDataset;
use crate::error::{CopilotError, Result};
use crate::execution::executor::QueryExecutor;
use crate::execution::result::QueryResult;
use crate::mapping::{ColumnMapping, LogicalField};
use crate::metrics::{round_to, MetricRegistry};
use crate::store::quote_identifier;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Decimal places kept in the campaign breakdown
pub const BREAKDOWN_DECIMALS: u32 = 3;

/// Sort priority for the campaign breakdown
const BREAKDOWN_SORT_KEYS: [LogicalField; 4] = [
    LogicalField::Cost,
    LogicalField::Revenue,
    LogicalField::Clicks,
    LogicalField::Impressions,
];

/// Ranking priority for the top campaigns
const TOP_CAMPAIGN_SORT_KEYS: [LogicalField; 5] = [
    LogicalField::Cost,
    LogicalField::Revenue,
    LogicalField::Conversions,
    LogicalField::Clicks,
    LogicalField::Impressions,
];

/// One campaign's summed fields and derived ratios. Absent values are omitted, never zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignPerformance {
    pub campaign: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl CampaignPerformance {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub totals: BTreeMap<LogicalField, f64>,
    pub metrics: BTreeMap<String, f64>,
    pub all_campaign_names: Vec<String>,
    pub top_campaigns: Vec<CampaignPerformance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateSpan>,
    pub total_rows: usize,
    pub campaign_breakdown: Vec<CampaignPerformance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_breakdown_error: Option<String>,
}

impl ContextSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct ContextAssembler {
    registry: MetricRegistry,
    top_n: usize,
    breakdown_limit: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            registry: MetricRegistry::standard(),
            top_n: 5,
            breakdown_limit: 25,
        }
    }
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: MetricRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_breakdown_limit(mut self, limit: usize) -> Self {
        self.breakdown_limit = limit;
        self
    }

    pub fn assemble(&self, dataset: &CampaignDataset, executor: &QueryExecutor) -> ContextSummary {
        info!("Assembling context summary over {} rows", dataset.row_count());

        let totals: BTreeMap<LogicalField, f64> = LogicalField::NUMERIC
            .iter()
            .filter_map(|f| dataset.column_sum(*f).map(|sum| (*f, sum)))
            .collect();
        let metrics = self.registry.compute(&totals);

        let grouped = match grouped_sums(dataset) {
            Ok(groups) => groups,
            Err(e) => {
                warn!("Per-campaign aggregation failed: {}", e);
                Vec::new()
            }
        };

        let (campaign_breakdown, campaign_breakdown_error) = self.breakdown(dataset, executor, &grouped);

        ContextSummary {
            totals,
            metrics,
            all_campaign_names: campaign_names(dataset),
            top_campaigns: self.top_campaigns(&grouped),
            date_range: date_span(dataset),
            total_rows: dataset.row_count(),
            campaign_breakdown,
            campaign_breakdown_error,
        }
    }

    fn top_campaigns(&self, grouped: &[(String, BTreeMap<LogicalField, f64>)]) -> Vec<CampaignPerformance> {
        let Some((_, first)) = grouped.first() else {
            return Vec::new();
        };
        let key = TOP_CAMPAIGN_SORT_KEYS.iter().copied().find(|f| first.contains_key(f));

        let mut rows: Vec<&(String, BTreeMap<LogicalField, f64>)> = grouped.iter().collect();
        if let Some(key) = key {
            rows.sort_by(|(a_name, a), (b_name, b)| {
                descending(a.get(&key).copied(), b.get(&key).copied()).then_with(|| a_name.cmp(b_name))
            });
        }

        rows.into_iter()
            .take(self.top_n)
            .map(|(name, sums)| {
                let mut values: BTreeMap<String, f64> =
                    sums.iter().map(|(f, v)| (f.as_str().to_string(), *v)).collect();
                values.extend(self.registry.compute_keyed(sums, 2));
                CampaignPerformance {
                    campaign: name.clone(),
                    values,
                }
            })
            .collect()
    }

    /// Store-backed breakdown first; in-process grouping when the store can't answer
    fn breakdown(
        &self,
        dataset: &CampaignDataset,
        executor: &QueryExecutor,
        grouped: &[(String, BTreeMap<LogicalField, f64>)],
    ) -> (Vec<CampaignPerformance>, Option<String>) {
        let mapping = dataset.numeric_mapping();
        let sql = match build_breakdown_sql(&mapping, &self.registry, executor.table_name(), self.breakdown_limit) {
            Ok(sql) => sql,
            Err(e) => return (Vec::new(), Some(e.user_message())),
        };

        let store_error = match executor.execute(&sql, None) {
            Ok(result) => {
                debug!("Campaign breakdown from store: {} rows", result.row_count);
                return (breakdown_from_result(&result), None);
            }
            Err(CopilotError::ExecutionFailed { store, .. }) => store.to_string(),
            Err(e) => e.to_string(),
        };
        warn!("Store breakdown failed, grouping in memory: {}", store_error);

        if grouped.is_empty() {
            return (Vec::new(), Some(store_error));
        }
        (self.breakdown_from_groups(grouped), Some(store_error))
    }

    fn breakdown_from_groups(&self, grouped: &[(String, BTreeMap<LogicalField, f64>)]) -> Vec<CampaignPerformance> {
        let mut rows: Vec<CampaignPerformance> = grouped
            .iter()
            .map(|(name, sums)| {
                let mut values: BTreeMap<String, f64> = sums
                    .iter()
                    .map(|(f, v)| (f.as_str().to_string(), round_to(*v, BREAKDOWN_DECIMALS)))
                    .collect();
                values.extend(self.registry.compute_keyed(sums, BREAKDOWN_DECIMALS));
                CampaignPerformance {
                    campaign: name.clone(),
                    values,
                }
            })
            .collect();
        sort_breakdown(&mut rows);
        rows.truncate(self.breakdown_limit);
        rows
    }
}

/// Campaign-level aggregate query over trusted mapping names only
pub fn build_breakdown_sql(
    mapping: &ColumnMapping,
    registry: &MetricRegistry,
    table: &str,
    limit: usize,
) -> Result<String> {
    let campaign_col = mapping.get(LogicalField::CampaignName).ok_or_else(|| {
        CopilotError::AggregationUnavailable(
            "Campaign name column is missing; cannot build campaign summary.".to_string(),
        )
    })?;
    let campaign = quote_identifier(campaign_col);
    let sum_of = |field: LogicalField| mapping.get(field).map(|c| format!("SUM({})", quote_identifier(c)));

    let mut select_parts = vec![format!("{} AS campaign", campaign)];
    for field in LogicalField::NUMERIC {
        if let Some(sum) = sum_of(field) {
            select_parts.push(format!("{} AS {}", sum, field.as_str()));
        }
    }
    for definition in registry.definitions() {
        if let (Some(num), Some(den)) = (sum_of(definition.numerator), sum_of(definition.denominator)) {
            select_parts.push(format!(
                "CASE WHEN {den} > 0 THEN {num} * {scale:.1} / {den} END AS {key}",
                den = den,
                num = num,
                scale = definition.scale,
                key = definition.key
            ));
        }
    }

    let order_by = match BREAKDOWN_SORT_KEYS.iter().find(|f| mapping.contains(**f)) {
        Some(key) => format!("{} DESC, campaign ASC", key.as_str()),
        None => "campaign ASC".to_string(),
    };

    Ok(format!(
        "SELECT\n  {}\nFROM {}\nWHERE {} IS NOT NULL\nGROUP BY {}\nORDER BY {}\nLIMIT {}",
        select_parts.join(",\n  "),
        quote_identifier(table),
        campaign,
        campaign,
        order_by,
        limit
    ))
}

fn breakdown_from_result(result: &QueryResult) -> Vec<CampaignPerformance> {
    let Some(campaign_idx) = result.column_index("campaign") else {
        return Vec::new();
    };
    result
        .rows
        .iter()
        .map(|row| {
            let values = result
                .columns
                .iter()
                .zip(row)
                .enumerate()
                .filter(|(idx, _)| *idx != campaign_idx)
                .filter_map(|(_, (column, cell))| {
                    cell.as_f64().map(|v| (column.clone(), round_to(v, BREAKDOWN_DECIMALS)))
                })
                .collect();
            CampaignPerformance {
                campaign: row.get(campaign_idx).map(|c| c.to_string()).unwrap_or_default(),
                values,
            }
        })
        .collect()
}

/// Sort by the first breakdown key any row carries, descending, then campaign name
pub fn sort_breakdown(rows: &mut [CampaignPerformance]) {
    let key = BREAKDOWN_SORT_KEYS
        .iter()
        .map(|f| f.as_str())
        .find(|k| rows.iter().any(|r| r.values.contains_key(*k)));
    rows.sort_by(|a, b| {
        let primary = match key {
            Some(k) => descending(a.get(k), b.get(k)),
            None => Ordering::Equal,
        };
        primary.then_with(|| a.campaign.cmp(&b.campaign))
    });
}

/// Descending order with absent values last
fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Per-campaign sums of every mapped numeric field, ordered by campaign name.
/// A group with no numeric value for a field leaves that field out.
fn grouped_sums(dataset: &CampaignDataset) -> Result<Vec<(String, BTreeMap<LogicalField, f64>)>> {
    let mapping = dataset.numeric_mapping();
    let Some(campaign_col) = mapping.get(LogicalField::CampaignName) else {
        return Ok(Vec::new());
    };

    let fields: Vec<LogicalField> = LogicalField::NUMERIC
        .iter()
        .copied()
        .filter(|f| mapping.contains(*f))
        .collect();
    if fields.is_empty() {
        return Ok(Vec::new());
    }
    let aggs: Vec<Expr> = fields
        .iter()
        .filter_map(|f| {
            mapping.get(*f).map(|c| {
                let values = col(c).cast(DataType::Float64);
                when(values.clone().count().gt(lit(0)))
                    .then(values.sum())
                    .otherwise(lit(NULL).cast(DataType::Float64))
                    .alias(f.as_str())
            })
        })
        .collect();

    let grouped = dataset
        .frame()
        .clone()
        .lazy()
        .filter(col(campaign_col).is_not_null())
        .group_by([col(campaign_col).cast(DataType::String).alias("campaign")])
        .agg(aggs)
        .collect()?;

    let names = grouped.column("campaign")?.str()?.clone();
    let mut columns = Vec::with_capacity(fields.len());
    for field in &fields {
        columns.push((*field, grouped.column(field.as_str())?.f64()?.clone()));
    }

    let mut out = Vec::with_capacity(grouped.height());
    for idx in 0..grouped.height() {
        let Some(name) = names.get(idx) else { continue };
        let sums = columns
            .iter()
            .filter_map(|(field, values)| values.get(idx).map(|v| (*field, v)))
            .collect();
        out.push((name.to_string(), sums));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn campaign_names(dataset: &CampaignDataset) -> Vec<String> {
    dataset
        .text_column(LogicalField::CampaignName)
        .map(|values| values.into_iter().flatten().sorted().dedup().collect())
        .unwrap_or_default()
}

/// Min/max of the mapped date column. Any unparsable value makes the span absent.
fn date_span(dataset: &CampaignDataset) -> Option<DateSpan> {
    let values = dataset.text_column(LogicalField::Date)?;
    let mut dates = Vec::new();
    for value in values.into_iter().flatten() {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_date(trimmed) {
            Some(date) => dates.push(date),
            None => {
                debug!("Unparsable date '{}'; omitting date range", trimmed);
                return None;
            }
        }
    }
    let start = dates.iter().min()?;
    let end = dates.iter().max()?;
    Some(DateSpan {
        start: start.format("%Y-%m-%d").to_string(),
        end: end.format("%Y-%m-%d").to_string(),
    })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
    const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}
