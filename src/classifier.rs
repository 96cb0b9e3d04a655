//! Query Classifier
//!
//! Decides whether a question can be answered by an exact query (Retrieval) or
//! needs synthesized analysis (Analysis). Analysis signals are checked first and
//! win outright, so "list campaigns and explain why X underperforms" is Analysis.
//! Questions that match neither list default to Analysis.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    Retrieval,
    Analysis,
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryClass::Retrieval => write!(f, "retrieval"),
            QueryClass::Analysis => write!(f, "analysis"),
        }
    }
}

/// Phrases that call for synthesized analysis, matched as substrings
const ANALYSIS_SIGNALS: &[&str] = &[
    "analyze",
    "analysis",
    "insight",
    "recommend",
    "suggest",
    "optimize",
    "improve",
    "best performing",
    "worst performing",
    "why",
    "explain",
    "compare",
    "trend",
    "pattern",
    "strategy",
    "should i",
    "what should",
    "how can",
    "advice",
    "guidance",
    "performance",
    "optimization",
    "recommendation",
];

/// Whole-token retrieval phrasings
const RETRIEVAL_SIGNALS: &[&str] = &[
    r"\blist\b",
    r"\bshow\b",
    r"\bwhat are\b",
    r"\bhow many\b",
    r"\bcount\b",
    r"\btotal\b",
    r"\bsum\b",
    r"\baverage\b",
    r"\bavg\b",
    r"\bmin\b",
    r"\bmax\b",
    r"\bwhich\b",
    r"\ball\b",
    r"\bfind\b",
    r"\bget\b",
    r"\bretrieve\b",
    r"\bdisplay\b",
    r"\bwhat is the\b",
    r"\bnames?\b.*\bcampaigns?\b",
    r"\bcampaigns?\b.*\bnames?\b",
    r"\bwhat\s+campaigns?\b",
];

lazy_static! {
    static ref RETRIEVAL_PATTERNS: Vec<(&'static str, Regex)> = RETRIEVAL_SIGNALS
        .iter()
        .map(|p| (*p, Regex::new(p).expect("valid retrieval pattern")))
        .collect();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace pattern");
}

/// Stateless keyword classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, question: &str) -> QueryClass {
        let (class, signal) = self.classify_with_signal(question);
        debug!("Classified as {} (signal: {:?})", class, signal);
        class
    }

    /// Classification plus the signal that decided it; `None` means the default applied
    pub fn classify_with_signal(&self, question: &str) -> (QueryClass, Option<&'static str>) {
        let text = normalize(question);

        if let Some(signal) = ANALYSIS_SIGNALS.iter().find(|s| text.contains(*s)) {
            return (QueryClass::Analysis, Some(signal));
        }

        if let Some((signal, _)) = RETRIEVAL_PATTERNS.iter().find(|(_, re)| re.is_match(&text)) {
            return (QueryClass::Retrieval, Some(signal));
        }

        (QueryClass::Analysis, None)
    }
}

fn normalize(question: &str) -> String {
    let lowered = question.trim().to_lowercase();
    WHITESPACE.replace_all(&lowered, " ").into_owned()
}
