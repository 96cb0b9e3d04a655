//! Column Mapping - logical advertising fields to physical dataset columns
//!
//! Built once per upload and shared read-only by every other component.

use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Logical fields the copilot understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalField {
    Impressions,
    Clicks,
    Cost,
    Conversions,
    Revenue,
    CampaignName,
    Date,
}

impl LogicalField {
    pub const ALL: [LogicalField; 7] = [
        LogicalField::Impressions,
        LogicalField::Clicks,
        LogicalField::Cost,
        LogicalField::Conversions,
        LogicalField::Revenue,
        LogicalField::CampaignName,
        LogicalField::Date,
    ];

    /// Fields that are summed when aggregating
    pub const NUMERIC: [LogicalField; 5] = [
        LogicalField::Impressions,
        LogicalField::Clicks,
        LogicalField::Cost,
        LogicalField::Conversions,
        LogicalField::Revenue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalField::Impressions => "impressions",
            LogicalField::Clicks => "clicks",
            LogicalField::Cost => "cost",
            LogicalField::Conversions => "conversions",
            LogicalField::Revenue => "revenue",
            LogicalField::CampaignName => "campaign_name",
            LogicalField::Date => "date",
        }
    }

    pub fn is_numeric(&self) -> bool {
        Self::NUMERIC.contains(self)
    }

    /// Header spellings recognised by [`ColumnMapping::detect`], in priority order
    fn synonyms(&self) -> &'static [&'static str] {
        match self {
            LogicalField::Impressions => &["impressions", "impr", "imp", "views"],
            LogicalField::Clicks => &["clicks", "click", "clk"],
            LogicalField::Cost => &["cost", "spend", "spending", "expense"],
            LogicalField::Conversions => &["conversions", "conv", "conversion", "converted"],
            LogicalField::Revenue => &["revenue", "rev", "sales", "income"],
            LogicalField::CampaignName => &[
                "campaign",
                "campaign name",
                "campaign_name",
                "campaignname",
                "ad group",
                "adgroup",
            ],
            LogicalField::Date => &["date", "day", "time", "timestamp", "period"],
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalField {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        LogicalField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == normalized || (normalized == "campaign" && *field == LogicalField::CampaignName))
            .ok_or_else(|| CopilotError::Config(format!("Unknown logical field '{}'", s)))
    }
}

/// Immutable mapping from logical field to the dataset's physical column name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    columns: BTreeMap<LogicalField, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used while the mapping is still being assembled
    pub fn with(mut self, field: LogicalField, column: impl Into<String>) -> Self {
        self.columns.insert(field, column.into());
        self
    }

    /// Detect logical fields from dataset headers by case-insensitive synonym match.
    /// The first synonym present wins; the original header spelling is kept.
    pub fn detect<S: AsRef<str>>(headers: &[S]) -> Self {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.as_ref().trim().to_lowercase())
            .collect();

        let mut mapping = Self::new();
        for field in LogicalField::ALL {
            let hit = field
                .synonyms()
                .iter()
                .find_map(|syn| normalized.iter().position(|h| h == syn));
            if let Some(idx) = hit {
                mapping.columns.insert(field, headers[idx].as_ref().to_string());
            }
        }
        mapping
    }

    pub fn get(&self, field: LogicalField) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: LogicalField) -> bool {
        self.columns.contains_key(&field)
    }

    /// Logical field for a physical column, if any
    pub fn field_for(&self, column: &str) -> Option<LogicalField> {
        self.columns
            .iter()
            .find(|(_, c)| c.as_str() == column)
            .map(|(f, _)| *f)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogicalField, &str)> {
        self.columns.iter().map(|(f, c)| (*f, c.as_str()))
    }

    pub fn missing(&self, required: &[LogicalField]) -> Vec<LogicalField> {
        required
            .iter()
            .copied()
            .filter(|f| !self.contains(*f))
            .collect()
    }

    /// Human-readable view of every logical field, "Not detected" when unmapped
    pub fn describe(&self) -> Vec<(LogicalField, String)> {
        LogicalField::ALL
            .iter()
            .map(|f| {
                let shown = self.get(*f).map(str::to_string).unwrap_or_else(|| "Not detected".to_string());
                (*f, shown)
            })
            .collect()
    }

    /// `-- field -> column` lines appended to schema text for the SQL prompt
    pub fn comment_lines(&self) -> String {
        let mut out = String::from("-- Column Mappings:");
        for (field, column) in self.iter() {
            out.push_str(&format!("\n-- {} -> {}", field, column));
        }
        out
    }

    /// Apply a `field=column` override, as accepted on the command line
    pub fn apply_override(self, entry: &str) -> Result<Self> {
        let (field, column) = entry
            .split_once('=')
            .ok_or_else(|| CopilotError::Config(format!("Expected field=column, got '{}'", entry)))?;
        let field: LogicalField = field.parse()?;
        let column = column.trim();
        if column.is_empty() {
            return Err(CopilotError::Config(format!("Empty column name for '{}'", field)));
        }
        Ok(self.with(field, column))
    }
}
