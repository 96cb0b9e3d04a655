//! Campaign dataset held for the session
//!
//! Wraps the uploaded table, the column mapping detected for it, and the
//! derived `metric_*` columns computed once at ingestion.

use crate::error::{CopilotError, Result};
use crate::execution::result::QueryResult;
use crate::mapping::{ColumnMapping, LogicalField};
use crate::metrics::MetricRegistry;
use crate::store::quote_identifier;
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Uploaded dataset plus its column mapping. Immutable after construction.
#[derive(Debug, Clone)]
pub struct CampaignDataset {
    frame: DataFrame,
    mapping: ColumnMapping,
    source_columns: Vec<String>,
}

impl CampaignDataset {
    /// Build a dataset from an already-parsed frame, adding per-row metric columns
    pub fn new(frame: DataFrame, mapping: ColumnMapping) -> Result<Self> {
        Self::with_registry(frame, mapping, &MetricRegistry::standard())
    }

    pub fn with_registry(frame: DataFrame, mapping: ColumnMapping, registry: &MetricRegistry) -> Result<Self> {
        let source_columns: Vec<String> = frame.get_column_names().iter().map(|s| s.to_string()).collect();

        for (field, column) in mapping.iter() {
            if !source_columns.iter().any(|c| c == column) {
                return Err(CopilotError::Config(format!(
                    "Column '{}' mapped to {} is not in the dataset",
                    column, field
                )));
            }
        }

        let present: Vec<&str> = source_columns.iter().map(String::as_str).collect();
        let exprs = registry.row_level_exprs(&mapping, &present);
        let frame = if exprs.is_empty() {
            frame
        } else {
            debug!("Adding {} row-level metric columns", exprs.len());
            frame.lazy().with_columns(exprs).collect()?
        };

        Ok(Self {
            frame,
            mapping,
            source_columns,
        })
    }

    /// Load a CSV file and detect its column mapping
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let frame = load_csv(path)?;
        let headers = frame.get_column_names();
        let mapping = ColumnMapping::detect(&headers);
        Self::new(frame, mapping)
    }

    /// Load a CSV file with a caller-supplied mapping
    pub fn from_csv_with_mapping(path: impl AsRef<Path>, mapping: ColumnMapping) -> Result<Self> {
        Self::new(load_csv(path)?, mapping)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Columns as uploaded, before metric columns were added
    pub fn source_columns(&self) -> &[String] {
        &self.source_columns
    }

    fn mapped_series(&self, field: LogicalField) -> Option<&Series> {
        let column = self.mapping.get(field)?;
        self.frame.column(column).ok()
    }

    /// Values of a mapped column coerced to f64; unparsable cells become `None`.
    /// A column in which nothing parses as a number is treated as absent.
    pub fn numeric_column(&self, field: LogicalField) -> Option<Vec<Option<f64>>> {
        let series = self.mapped_series(field)?;
        let cast = series.cast(&DataType::Float64).ok()?;
        let values: Vec<Option<f64>> = cast.f64().ok()?.into_iter().collect();
        if values.iter().all(Option::is_none) {
            debug!("Column mapped to {} holds no numeric values", field);
            return None;
        }
        Some(values)
    }

    /// The column mapping without numeric fields whose column holds no numbers
    pub fn numeric_mapping(&self) -> ColumnMapping {
        self.mapping
            .iter()
            .filter(|(field, _)| !field.is_numeric() || self.numeric_column(*field).is_some())
            .fold(ColumnMapping::new(), |mapping, (field, column)| mapping.with(field, column))
    }

    /// Values of a mapped column rendered as text
    pub fn text_column(&self, field: LogicalField) -> Option<Vec<Option<String>>> {
        let series = self.mapped_series(field)?;
        let cast = series.cast(&DataType::String).ok()?;
        let values = cast
            .str()
            .ok()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect();
        Some(values)
    }

    /// Sum of a mapped numeric column, ignoring nulls. `None` when unmapped.
    pub fn column_sum(&self, field: LogicalField) -> Option<f64> {
        let values = self.numeric_column(field)?;
        Some(values.into_iter().flatten().sum())
    }

    /// Schema text derived from the frame itself, used when the store cannot describe its table
    pub fn schema_text(&self, table: &str) -> String {
        let mut lines = vec![format!("CREATE TABLE {} (", table)];
        for series in self.frame.get_columns() {
            let name = series.name();
            let logical = self
                .mapping
                .field_for(name)
                .map(|f| f.as_str().to_string())
                .unwrap_or_else(|| name.to_lowercase().replace(' ', "_"));
            lines.push(format!(
                "  {} {},  -- Standard name: {}",
                quote_identifier(name),
                sql_type_for(series.dtype()),
                logical
            ));
        }
        lines.push(");".to_string());
        lines.push(String::new());
        lines.push(self.mapping.comment_lines());
        lines.join("\n")
    }

    /// First `n` rows rendered as a markdown table
    pub fn sample_text(&self, n: usize) -> String {
        let head = self.frame.head(Some(n));
        match QueryResult::from_frame(&head, crate::execution::result::ResultSource::InMemory, 0) {
            Ok(result) => result.to_markdown(),
            Err(e) => format!("Error getting sample data: {}", e),
        }
    }
}

/// SQLite column affinity for a polars dtype
pub fn sql_type_for(dtype: &DataType) -> &'static str {
    if dtype.is_integer() || matches!(dtype, DataType::Boolean) {
        "INTEGER"
    } else if dtype.is_float() {
        "REAL"
    } else {
        "TEXT"
    }
}

/// Read a CSV file with headers, parsing date-like columns
pub fn load_csv(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    info!("Loading CSV {:?}", path);
    let frame = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_try_parse_dates(true)
        .with_infer_schema_length(Some(1000))
        .finish()
        .map_err(|e| CopilotError::Polars(format!("Failed to read CSV {:?}: {}", path, e)))?
        .collect()?;
    info!("Loaded {} rows x {} columns", frame.height(), frame.width());
    Ok(frame)
}
