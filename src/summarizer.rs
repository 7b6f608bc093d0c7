//! Summarizer - narrative answer over the query result
//!
//! The model is asked for a small JSON object. Whatever it returns is cleaned
//! the same way as SQL responses; text that holds no object still reaches
//! the caller as the summary body.

use crate::db::Row;
use crate::error::{PipelineError, Result};
use crate::llm::CompletionClient;
use crate::output_parser::{clean_model_output, first_balanced_object};
use crate::prompts::build_summary_prompt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const SUMMARY_MAX_TOKENS: u32 = 10000;
pub const SUMMARY_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Summary {
    pub summary_content: String,
    pub key_info: String,
    pub record_overview: String,
    pub charts: Vec<Value>,
}

impl Summary {
    /// Read a summary out of raw model text.
    pub fn from_model_output(raw: &str) -> Self {
        let cleaned = clean_model_output(raw);
        let candidate = first_balanced_object(&cleaned).unwrap_or(&cleaned);
        match serde_json::from_str::<Summary>(candidate) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Summary is not JSON ({}), keeping raw text", e);
                Summary {
                    summary_content: cleaned,
                    ..Default::default()
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct Summarizer {
    llm: Arc<dyn CompletionClient>,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn CompletionClient>) -> Self {
        Self { llm }
    }

    pub async fn summarize(&self, question: &str, sql: &str, rows: &[Row]) -> Result<Summary> {
        info!("📝 Summarizing {} rows", rows.len());
        let prompt = build_summary_prompt(question, sql, rows);
        let raw = self
            .llm
            .complete(&prompt, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE)
            .await
            .map_err(|e| PipelineError::Summary(e.to_string()))?;
        Ok(Summary::from_model_output(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl CompletionClient for Canned {
        async fn complete(&self, _prompt: &str, max_tokens: u32, _temperature: f32) -> Result<String> {
            assert_eq!(max_tokens, SUMMARY_MAX_TOKENS);
            Ok(self.0.to_string())
        }
    }

    struct Down;

    #[async_trait]
    impl CompletionClient for Down {
        async fn complete(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            Err(PipelineError::UpstreamCall("503".to_string()))
        }
    }

    #[test]
    fn test_summary_from_fenced_json() {
        let raw = "```json\n{\"summaryContent\": \"王飞共带班3次\", \"keyInfo\": \"3月\", \"charts\": []}\n```";
        let summary = Summary::from_model_output(raw);
        assert_eq!(summary.summary_content, "王飞共带班3次");
        assert_eq!(summary.key_info, "3月");
        assert_eq!(summary.record_overview, "");
    }

    #[test]
    fn test_plain_text_becomes_content() {
        let summary = Summary::from_model_output("没有找到相关数据。");
        assert_eq!(summary.summary_content, "没有找到相关数据。");
        assert!(summary.charts.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_calls_model() {
        let summarizer = Summarizer::new(Arc::new(Canned(r#"说明：{"summaryContent":"ok"}"#)));
        let summary = summarizer.summarize("q", "SELECT 1", &[]).await.unwrap();
        assert_eq!(summary.summary_content, "ok");
    }

    #[tokio::test]
    async fn test_upstream_failure_becomes_summary_error() {
        let summarizer = Summarizer::new(Arc::new(Down));
        let err = summarizer.summarize("q", "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Summary(_)));
    }
}
