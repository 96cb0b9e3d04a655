//! Query Result - standardized result from the store or the in-memory evaluator

use crate::error::{CopilotError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a result was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Store,
    InMemory,
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSource::Store => write!(f, "sqlite"),
            ResultSource::InMemory => write!(f, "in-memory"),
        }
    }
}

/// One scalar cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Real(f) => Some(*f),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse().ok(),
            CellValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Boolean(b) => write!(f, "{}", b),
            CellValue::Integer(i) => write!(f, "{}", i),
            // Trim float noise without hiding meaningful precision
            CellValue::Real(v) => write!(f, "{}", (v * 10_000.0).round() / 10_000.0),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<AnyValue<'_>> for CellValue {
    fn from(value: AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => CellValue::Null,
            AnyValue::Boolean(b) => CellValue::Boolean(b),
            AnyValue::String(s) => CellValue::Text(s.to_string()),
            AnyValue::StringOwned(s) => CellValue::Text(s.to_string()),
            AnyValue::Int8(i) => CellValue::Integer(i as i64),
            AnyValue::Int16(i) => CellValue::Integer(i as i64),
            AnyValue::Int32(i) => CellValue::Integer(i as i64),
            AnyValue::Int64(i) => CellValue::Integer(i),
            AnyValue::UInt8(u) => CellValue::Integer(u as i64),
            AnyValue::UInt16(u) => CellValue::Integer(u as i64),
            AnyValue::UInt32(u) => CellValue::Integer(u as i64),
            AnyValue::UInt64(u) => i64::try_from(u)
                .map(CellValue::Integer)
                .unwrap_or(CellValue::Real(u as f64)),
            AnyValue::Float32(f) => real_or_null(f as f64),
            AnyValue::Float64(f) => real_or_null(f),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for CellValue {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(f) => real_or_null(f),
            ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => CellValue::Text(format!("<{} bytes>", bytes.len())),
        }
    }
}

fn real_or_null(f: f64) -> CellValue {
    if f.is_finite() {
        CellValue::Real(f)
    } else {
        CellValue::Null
    }
}

/// Tabular query result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub source: ResultSource,
    pub execution_time_ms: u64,
    /// Non-fatal notes, e.g. that the store was bypassed
    pub warnings: Vec<String>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>, source: ResultSource, execution_time_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            source,
            execution_time_ms,
            warnings: Vec::new(),
        }
    }

    /// Convert a collected frame into a result
    pub fn from_frame(frame: &DataFrame, source: ResultSource, execution_time_ms: u64) -> Result<Self> {
        let columns: Vec<String> = frame.get_column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = Vec::with_capacity(frame.height());
        for row_idx in 0..frame.height() {
            let mut row = Vec::with_capacity(columns.len());
            for series in frame.get_columns() {
                let value = series
                    .get(row_idx)
                    .map_err(|e| CopilotError::Polars(format!("Failed to get value: {}", e)))?;
                row.push(CellValue::from(value));
            }
            rows.push(row);
        }
        Ok(Self::new(columns, rows, source, execution_time_ms))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Single-cell results (e.g. `SELECT SUM(...)`) as a number
    pub fn scalar_f64(&self) -> Option<f64> {
        if self.rows.len() == 1 && self.columns.len() == 1 {
            self.rows[0][0].as_f64()
        } else {
            None
        }
    }

    pub fn to_markdown(&self) -> String {
        if self.rows.is_empty() {
            return "No results found.".to_string();
        }
        let escape = |s: String| s.replace('|', "\\|").replace('\n', " ");
        let mut out = String::new();
        out.push_str("| ");
        out.push_str(&self.columns.iter().map(|c| escape(c.clone())).collect::<Vec<_>>().join(" | "));
        out.push_str(" |\n|");
        for _ in &self.columns {
            out.push_str(":---|");
        }
        for row in &self.rows {
            out.push_str("\n| ");
            out.push_str(&row.iter().map(|v| escape(v.to_string())).collect::<Vec<_>>().join(" | "));
            out.push_str(" |");
        }
        out
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|e| CopilotError::Io(e.into()))?;
        for row in &self.rows {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(|e| CopilotError::Io(e.into()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| CopilotError::Io(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null)))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::json!({
            "columns": self.columns,
            "rows": rows,
            "source": self.source,
        })
    }
}
