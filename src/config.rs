//! Runtime configuration
//!
//! Defaults, then an optional JSON file, then environment variables (after
//! `.env` is loaded by the binary). Later sources win.

use crate::error::{CopilotError, Result};
use crate::router::RouterSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub db_path: PathBuf,
    pub request_timeout_secs: u64,
    pub breakdown_limit: usize,
    pub top_campaigns: usize,
    pub sample_rows: usize,
    pub temperature: f64,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            db_path: std::env::temp_dir().join("ads_reporting_copilot.db"),
            request_timeout_secs: 30,
            breakdown_limit: 25,
            top_campaigns: 5,
            sample_rows: 3,
            temperature: 0.1,
        }
    }
}

impl CopilotConfig {
    /// Defaults, overlaid with `path` if given, overlaid with the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| CopilotError::Config(format!("Invalid config file {:?}: {}", path, e)))
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.model = model;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.base_url = url;
        }
        if let Some(path) = get("COPILOT_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(v) = get("COPILOT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("COPILOT_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("COPILOT_BREAKDOWN_LIMIT") {
            self.breakdown_limit = parse_number("COPILOT_BREAKDOWN_LIMIT", &v)?;
        }
        if let Some(v) = get("COPILOT_TOP_CAMPAIGNS") {
            self.top_campaigns = parse_number("COPILOT_TOP_CAMPAIGNS", &v)?;
        }
        if let Some(v) = get("COPILOT_SAMPLE_ROWS") {
            self.sample_rows = parse_number("COPILOT_SAMPLE_ROWS", &v)?;
        }
        if let Some(v) = get("COPILOT_TEMPERATURE") {
            self.temperature = parse_number("COPILOT_TEMPERATURE", &v)?;
        }

        if self.request_timeout_secs == 0 {
            return Err(CopilotError::Config("COPILOT_REQUEST_TIMEOUT_SECS must be positive".to_string()));
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            request_timeout: self.request_timeout(),
            sample_rows: self.sample_rows,
            top_campaigns: self.top_campaigns,
            breakdown_limit: self.breakdown_limit,
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CopilotError::Config(format!("{} must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = CopilotConfig::default().with_overrides(|_| None).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.breakdown_limit, 25);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.db_path.ends_with("ads_reporting_copilot.db"));
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("COPILOT_BREAKDOWN_LIMIT", "10"),
            ("COPILOT_TEMPERATURE", "0.3"),
            ("OPENAI_MODEL", "  "),
        ]);
        let config = CopilotConfig::default()
            .with_overrides(|k| vars.get(k).cloned())
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.breakdown_limit, 10);
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.router_settings().breakdown_limit, 10);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let vars = env(&[("COPILOT_SAMPLE_ROWS", "three")]);
        let err = CopilotConfig::default()
            .with_overrides(|k| vars.get(k).cloned())
            .unwrap_err();
        assert!(matches!(err, CopilotError::Config(_)));

        let zero = env(&[("COPILOT_REQUEST_TIMEOUT_SECS", "0")]);
        assert!(CopilotConfig::default().with_overrides(|k| zero.get(k).cloned()).is_err());
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("copilot.json");
        std::fs::write(&path, r#"{"model": "gpt-4.1", "top_campaigns": 3}"#).unwrap();
        let config = CopilotConfig::from_file(&path).unwrap();
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.top_campaigns, 3);
        assert_eq!(config.sample_rows, 3);

        let vars = env(&[("COPILOT_TOP_CAMPAIGNS", "7")]);
        let config = config.with_overrides(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.top_campaigns, 7);
    }
}
