use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Tokens allowed for the SQL-generation call.
pub const SQL_MAX_TOKENS: u32 = 2000;
pub const SQL_TEMPERATURE: f32 = 0.1;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Anything that turns a prompt into model text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Chat,
    Completion,
}

impl FromStr for ApiType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(ApiType::Chat),
            "completion" => Ok(ApiType::Completion),
            other => Err(PipelineError::Config(format!(
                "unknown LLM API type '{}', expected chat or completion",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    api_type: ApiType,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, api_type: ApiType) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_type,
            retry: RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(4)),
        })
    }

    /// Total attempts per completion, the first one included.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        match self.api_type {
            ApiType::Chat => format!("{}/v1/chat/completions", self.base_url),
            ApiType::Completion => format!("{}/v1/completions", self.base_url),
        }
    }

    fn request_body(&self, prompt: &str, max_tokens: u32, temperature: f32) -> serde_json::Value {
        match self.api_type {
            ApiType::Chat => serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "user", "content": prompt}
                ],
                "temperature": temperature,
                "max_tokens": max_tokens,
            }),
            ApiType::Completion => serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "temperature": temperature,
                "max_tokens": max_tokens,
            }),
        }
    }

    async fn call_llm(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let mut request = self
            .http
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt, max_tokens, temperature));
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::UpstreamCall(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PipelineError::UpstreamCall(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamCall(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json, self.api_type)
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        debug!("LLM request to {} ({} prompt chars)", self.endpoint(), prompt.chars().count());
        self.retry
            .run(
                || self.call_llm(prompt, max_tokens, temperature),
                |e| matches!(e, PipelineError::UpstreamCall(_)),
                |_, _| {},
            )
            .await
    }
}

/// Pull the generated text out of a chat or completion response.
fn extract_content(response_json: &serde_json::Value, api_type: ApiType) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(PipelineError::UpstreamCall(format!(
            "LLM API error: {}",
            serde_json::to_string(error).unwrap_or_else(|_| "Unknown error".to_string())
        )));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| PipelineError::UpstreamCall("No choices array in LLM response".to_string()))?;
    let first = choices
        .first()
        .ok_or_else(|| PipelineError::UpstreamCall("Empty choices array in LLM response".to_string()))?;

    if let Some(finish_reason) = first.get("finish_reason").and_then(|r| r.as_str()) {
        if finish_reason == "length" {
            warn!("⚠️  LLM response was truncated due to length limit");
        } else if finish_reason == "content_filter" {
            return Err(PipelineError::UpstreamCall(
                "LLM response was filtered by content policy".to_string(),
            ));
        }
    }

    let content = match api_type {
        ApiType::Chat => first["message"]["content"].as_str(),
        ApiType::Completion => first["text"].as_str(),
    }
    .ok_or_else(|| PipelineError::UpstreamCall("No content in LLM response".to_string()))?;

    if content.trim().is_empty() {
        return Err(PipelineError::UpstreamCall("Empty content in LLM response".to_string()));
    }

    Ok(content.to_string())
}
