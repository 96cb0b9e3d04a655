//! Metric Engine
//!
//! Ratio-of-sums advertising metrics. Every division is zero-guarded: a
//! denominator that is zero, negative, or not finite yields no value.

use crate::mapping::{ColumnMapping, LogicalField};
use polars::prelude::*;
use std::collections::BTreeMap;

/// Prefix for derived per-row metric columns
pub const METRIC_COLUMN_PREFIX: &str = "metric_";

/// One named ratio metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    /// Uppercase label used in the aggregate KPI set (e.g. "CTR")
    pub label: &'static str,
    /// Lowercase key used in per-campaign rows and SQL aliases (e.g. "ctr")
    pub key: &'static str,
    pub description: &'static str,
    pub numerator: LogicalField,
    pub denominator: LogicalField,
    /// Multiplier applied after division (100 for percentages)
    pub scale: f64,
}

impl MetricDefinition {
    pub fn column_name(&self) -> String {
        format!("{}{}", METRIC_COLUMN_PREFIX, self.key)
    }

    pub fn required_fields(&self) -> [LogicalField; 2] {
        [self.numerator, self.denominator]
    }

    pub fn evaluate(&self, numerator: f64, denominator: f64) -> Option<f64> {
        safe_ratio(numerator, denominator, self.scale)
    }

    /// Evaluate against a set of summed fields; `None` when an input is absent
    pub fn evaluate_sums(&self, sums: &BTreeMap<LogicalField, f64>) -> Option<f64> {
        let numerator = sums.get(&self.numerator)?;
        let denominator = sums.get(&self.denominator)?;
        self.evaluate(*numerator, *denominator)
    }
}

/// `numerator / denominator * scale`, absent when the denominator is not positive
pub fn safe_ratio(numerator: f64, denominator: f64, scale: f64) -> Option<f64> {
    if !denominator.is_finite() || denominator <= 0.0 || !numerator.is_finite() {
        return None;
    }
    Some(numerator / denominator * scale)
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Registry of metric formulas. The standard set covers CTR, CPC, CPA, ROAS and CVR.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl MetricRegistry {
    pub fn standard() -> Self {
        Self {
            definitions: vec![
                MetricDefinition {
                    label: "CTR",
                    key: "ctr",
                    description: "Click-Through Rate (%)",
                    numerator: LogicalField::Clicks,
                    denominator: LogicalField::Impressions,
                    scale: 100.0,
                },
                MetricDefinition {
                    label: "CPC",
                    key: "cpc",
                    description: "Cost Per Click",
                    numerator: LogicalField::Cost,
                    denominator: LogicalField::Clicks,
                    scale: 1.0,
                },
                MetricDefinition {
                    label: "CPA",
                    key: "cpa",
                    description: "Cost Per Acquisition",
                    numerator: LogicalField::Cost,
                    denominator: LogicalField::Conversions,
                    scale: 1.0,
                },
                MetricDefinition {
                    label: "ROAS",
                    key: "roas",
                    description: "Return on Ad Spend",
                    numerator: LogicalField::Revenue,
                    denominator: LogicalField::Cost,
                    scale: 1.0,
                },
                MetricDefinition {
                    label: "CVR",
                    key: "cvr",
                    description: "Conversion Rate (%)",
                    numerator: LogicalField::Conversions,
                    denominator: LogicalField::Clicks,
                    scale: 100.0,
                },
            ],
        }
    }

    pub fn with_definitions(definitions: Vec<MetricDefinition>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    /// Metrics whose inputs are both mapped
    pub fn available<'a>(&'a self, mapping: &'a ColumnMapping) -> impl Iterator<Item = &'a MetricDefinition> + 'a {
        self.definitions
            .iter()
            .filter(move |d| mapping.missing(&d.required_fields()).is_empty())
    }

    /// Aggregate KPI set keyed by label, rounded to 2 decimals.
    /// Metrics with a missing input or a non-positive denominator are omitted.
    pub fn compute(&self, totals: &BTreeMap<LogicalField, f64>) -> BTreeMap<String, f64> {
        self.definitions
            .iter()
            .filter_map(|d| d.evaluate_sums(totals).map(|v| (d.label.to_string(), round_to(v, 2))))
            .collect()
    }

    /// Per-group ratios keyed by lowercase key, rounded to `places`
    pub fn compute_keyed(&self, sums: &BTreeMap<LogicalField, f64>, places: u32) -> BTreeMap<String, f64> {
        self.definitions
            .iter()
            .filter_map(|d| d.evaluate_sums(sums).map(|v| (d.key.to_string(), round_to(v, places))))
            .collect()
    }

    /// Column expressions for the per-row metric columns.
    /// Only metrics whose input columns exist in `present` are produced.
    pub fn row_level_exprs(&self, mapping: &ColumnMapping, present: &[&str]) -> Vec<Expr> {
        self.definitions
            .iter()
            .filter_map(|d| {
                let num = mapping.get(d.numerator)?;
                let den = mapping.get(d.denominator)?;
                if !present.contains(&num) || !present.contains(&den) {
                    return None;
                }
                let den_expr = col(den).cast(DataType::Float64);
                let expr = when(den_expr.clone().gt(lit(0.0)))
                    .then(col(num).cast(DataType::Float64) / den_expr * lit(d.scale))
                    .otherwise(lit(NULL).cast(DataType::Float64))
                    .alias(&d.column_name());
                Some(expr)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(pairs: &[(LogicalField, f64)]) -> BTreeMap<LogicalField, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_safe_ratio_guards_zero_and_negative() {
        assert_eq!(safe_ratio(10.0, 0.0, 1.0), None);
        assert_eq!(safe_ratio(10.0, -5.0, 1.0), None);
        assert_eq!(safe_ratio(10.0, f64::NAN, 1.0), None);
        assert_eq!(safe_ratio(5.0, 200.0, 100.0), Some(2.5));
    }

    #[test]
    fn test_compute_omits_missing_inputs() {
        let registry = MetricRegistry::standard();
        let metrics = registry.compute(&totals(&[
            (LogicalField::Impressions, 4500.0),
            (LogicalField::Clicks, 160.0),
            (LogicalField::Cost, 310.0),
        ]));
        assert_eq!(metrics.get("CTR"), Some(&3.56));
        assert_eq!(metrics.get("CPC"), Some(&1.94));
        assert!(!metrics.contains_key("CPA"));
        assert!(!metrics.contains_key("ROAS"));
        assert!(!metrics.contains_key("CVR"));
    }

    #[test]
    fn test_compute_omits_zero_denominator() {
        let registry = MetricRegistry::standard();
        let metrics = registry.compute(&totals(&[
            (LogicalField::Clicks, 0.0),
            (LogicalField::Cost, 50.0),
            (LogicalField::Conversions, 0.0),
        ]));
        assert!(!metrics.contains_key("CPC"));
        assert!(!metrics.contains_key("CPA"));
        assert!(!metrics.contains_key("CVR"));
    }

    #[test]
    fn test_row_level_exprs_zero_guarded() {
        let mapping = ColumnMapping::new()
            .with(LogicalField::Clicks, "Clicks")
            .with(LogicalField::Impressions, "Impressions")
            .with(LogicalField::Cost, "Cost");
        let df = df!(
            "Impressions" => [100i64, 0, 400],
            "Clicks" => [5i64, 3, 0],
            "Cost" => [10.0, 6.0, 4.0]
        )
        .unwrap();
        let registry = MetricRegistry::standard();
        let exprs = registry.row_level_exprs(&mapping, &df.get_column_names());
        assert_eq!(exprs.len(), 2);

        let out = df.lazy().with_columns(exprs).collect().unwrap();
        let ctr: Vec<Option<f64>> = out.column("metric_ctr").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(ctr, vec![Some(5.0), None, Some(0.0)]);
        let cpc: Vec<Option<f64>> = out.column("metric_cpc").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(cpc, vec![Some(2.0), Some(2.0), None]);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(3.14159, 3), 3.142);
        assert_eq!(round_to(2.0 / 3.0, 2), 0.67);
    }
}
