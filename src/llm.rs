//! Text-generation client
//!
//! Both the query translator and the narrative generator talk to the model
//! through [`TextGenerator`]; [`LlmClient`] is the OpenAI-compatible implementation.

use crate::error::{CopilotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One request to the text-generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// System instructions
    pub system: String,
    /// Structured context (schema, samples, or the context summary JSON)
    pub context: String,
    /// The user's question, verbatim
    pub question: String,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, context: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            context: context.into(),
            question: question.into(),
        }
    }

    /// Context and question joined into the single user message sent to the model
    pub fn user_message(&self) -> String {
        if self.context.is_empty() {
            format!("User question: {}", self.question)
        } else {
            format!("{}\n\nUser question: {}", self.context, self.question)
        }
    }
}

/// The external text-generation service. Responses are untrusted free text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

pub struct LlmClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: Option<String>, model: String, base_url: String) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.1,
            max_tokens: 1500,
            timeout: Duration::from_secs(30),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user_message()}
            ],
            "temperature": self.temperature,
        });

        // Newer models reject max_tokens
        if self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("gpt-4o") {
            body["max_completion_tokens"] = serde_json::json!(self.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(self.max_tokens);
        }
        body
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            CopilotError::ExternalService("OPENAI_API_KEY is not set".to_string())
        })?;

        info!("Calling {} ({} chars of context)", self.model, request.context.len());
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CopilotError::RequestTimeout(self.timeout.as_secs())
                } else {
                    CopilotError::ExternalService(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let reason = match status.as_u16() {
                401 | 403 => "authentication failed",
                429 => "rate limit or quota exceeded",
                _ => "request failed",
            };
            warn!("LLM API returned {}: {}", status, error_text);
            return Err(CopilotError::ExternalService(format!(
                "LLM API error ({}, {}): {}",
                status, reason, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CopilotError::ExternalService(format!("Failed to parse LLM response: {}", e)))?;
        extract_content(&response_json)
    }
}

/// Pull the first choice's message text out of a chat-completions response
fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(CopilotError::ExternalService(format!("LLM API error: {}", error)));
    }

    let choice = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| CopilotError::ExternalService("No choices in LLM response".to_string()))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(CopilotError::ExternalService(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    let content = choice["message"]["content"]
        .as_str()
        .map(str::trim)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(CopilotError::ExternalService("Empty content in LLM response".to_string()));
    }
    debug!("LLM returned {} chars", content.len());
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "  SELECT 1  "}, "finish_reason": "stop"}]
        });
        assert_eq!(extract_content(&body).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_extract_content_errors() {
        let err = serde_json::json!({"error": {"message": "invalid key"}});
        assert!(matches!(extract_content(&err), Err(CopilotError::ExternalService(_))));

        let filtered = serde_json::json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "content_filter"}]
        });
        assert!(extract_content(&filtered).is_err());

        let empty = serde_json::json!({"choices": []});
        assert!(extract_content(&empty).is_err());
    }

    #[test]
    fn test_request_body_token_field() {
        let request = GenerationRequest::new("sys", "ctx", "q");
        let client = LlmClient::new(None, "gpt-4o-mini".to_string(), "http://localhost/v1/".to_string());
        let body = client.request_body(&request);
        assert!(body.get("max_completion_tokens").is_some());
        assert_eq!(body["messages"][1]["content"], "ctx\n\nUser question: q");

        let legacy = LlmClient::new(None, "gpt-3.5-turbo".to_string(), "http://localhost/v1".to_string());
        assert!(legacy.request_body(&request).get("max_tokens").is_some());
    }

    #[tokio::test]
    async fn test_missing_key_is_external_fault() {
        let client = LlmClient::new(Some("  ".to_string()), "gpt-4o-mini".to_string(), "http://localhost".to_string());
        let err = client.generate(&GenerationRequest::new("s", "", "q")).await.unwrap_err();
        assert!(matches!(err, CopilotError::ExternalService(_)));
    }
}
