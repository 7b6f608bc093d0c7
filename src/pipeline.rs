//! Query Pipeline
//!
//! Question → prompt → model → SQL → field mapping → validation → database
//! → summary. Three retry layers wrap it:
//! - generation: a response that cannot be turned into valid SQL is
//!   regenerated from the same prompt
//! - execution: transient database faults are retried after a fixed delay
//! - pipeline: a failed run is started again from the prompt
//!
//! Every stage transition and failure is appended to a per-request log that
//! is returned with the result.

use crate::db::{Database, Row};
use crate::error::{PipelineError, Result};
use crate::field_mapper::FieldMapper;
use crate::llm::{CompletionClient, SQL_MAX_TOKENS, SQL_TEMPERATURE};
use crate::prompts::build_sql_prompt;
use crate::retry::RetryPolicy;
use crate::schema::SchemaText;
use crate::sql_generator::{SqlGenerator, TemplateInfo};
use crate::summarizer::{Summarizer, Summary};
use crate::validator::SqlValidator;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Drafting,
    Parsed,
    Rendered,
    Mapped,
    Validated,
    Executed,
    Summarized,
    Done,
    Failed,
}

/// One entry of the per-request log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub pipeline_attempt: usize,
    pub generation_attempt: Option<usize>,
    pub stage: PipelineStage,
    pub failure: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub question: String,
    pub sql: Option<String>,
    pub rows: Vec<Row>,
    pub summary: Option<Summary>,
    pub success: bool,
    pub error: Option<String>,
    /// Pipeline attempts, the reported run included.
    pub attempts: usize,
    /// Generation attempts used by the reported run.
    pub sql_attempts: usize,
    pub logs: Vec<AttemptRecord>,
    pub template_info: Option<TemplateInfo>,
}

impl PipelineResult {
    fn failed(question: &str, error: String, sql_attempts: usize) -> Self {
        Self {
            question: question.to_string(),
            sql: None,
            rows: Vec::new(),
            summary: None,
            success: false,
            error: Some(error),
            attempts: 0,
            sql_attempts,
            logs: Vec::new(),
            template_info: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub generation_attempts: usize,
    pub execution_retry: RetryPolicy,
    pub pipeline_attempts: usize,
    pub summarize: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation_attempts: 6,
            execution_retry: RetryPolicy::fixed(3, Duration::from_millis(500)),
            pipeline_attempts: 3,
            summarize: true,
        }
    }
}

/// Appends records for one pipeline attempt.
struct RunLog<'a> {
    records: &'a mut Vec<AttemptRecord>,
    started: Instant,
    pipeline_attempt: usize,
}

impl RunLog<'_> {
    fn push(&mut self, generation_attempt: Option<usize>, stage: PipelineStage, failure: Option<String>) {
        self.records.push(AttemptRecord {
            pipeline_attempt: self.pipeline_attempt,
            generation_attempt,
            stage,
            failure,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    fn stage(&mut self, generation_attempt: Option<usize>, stage: PipelineStage) {
        self.push(generation_attempt, stage, None);
    }

    fn failure(&mut self, generation_attempt: Option<usize>, stage: PipelineStage, error: &PipelineError) {
        self.push(generation_attempt, stage, Some(error.to_string()));
    }
}

/// SQL that passed validation, with where it came from.
struct Draft {
    sql: String,
    template_info: TemplateInfo,
}

/// The stage a failure stopped the run at.
fn failed_stage(error: &PipelineError) -> PipelineStage {
    match error {
        PipelineError::UpstreamCall(_) => PipelineStage::Drafting,
        PipelineError::Parse(_) | PipelineError::TruncatedOutput(_) | PipelineError::Json(_) => {
            PipelineStage::Parsed
        }
        PipelineError::MissingParameter(_) | PipelineError::UnknownTemplate(_) => PipelineStage::Rendered,
        PipelineError::Validation(_) => PipelineStage::Validated,
        PipelineError::TransientExecution(_) | PipelineError::FatalExecution(_) => PipelineStage::Executed,
        PipelineError::Summary(_) => PipelineStage::Summarized,
        _ => PipelineStage::Failed,
    }
}

pub struct QueryPipeline {
    llm: Arc<dyn CompletionClient>,
    db: Arc<dyn Database>,
    schema: SchemaText,
    generator: SqlGenerator,
    mapper: FieldMapper,
    summarizer: Summarizer,
    config: PipelineConfig,
}

impl QueryPipeline {
    pub fn new(llm: Arc<dyn CompletionClient>, db: Arc<dyn Database>, schema: SchemaText) -> Self {
        Self {
            summarizer: Summarizer::new(Arc::clone(&llm)),
            llm,
            db,
            schema,
            generator: SqlGenerator::default(),
            mapper: FieldMapper::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_field_mapper(mut self, mapper: FieldMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    pub fn schema(&self) -> &SchemaText {
        &self.schema
    }

    /// Run with the configured summary setting.
    pub async fn run(&self, question: &str) -> PipelineResult {
        self.run_with(question, self.config.summarize).await
    }

    /// Run the whole pipeline, retrying failed runs.
    ///
    /// Returns the first successful run, or the last failed one with the
    /// total attempt count. The log spans every attempt.
    pub async fn run_with(&self, question: &str, summarize: bool) -> PipelineResult {
        let started = Instant::now();
        let max_attempts = self.config.pipeline_attempts.max(1);
        let mut records = Vec::new();
        let mut last: Option<PipelineResult> = None;

        for attempt in 1..=max_attempts {
            info!("🔄 Pipeline attempt {}/{} for: {}", attempt, max_attempts, question);
            let mut log = RunLog {
                records: &mut records,
                started,
                pipeline_attempt: attempt,
            };
            let mut result = self.run_once(question, summarize, &mut log).await;
            result.attempts = attempt;

            if result.success {
                info!("✅ Pipeline succeeded on attempt {}", attempt);
                result.logs = records;
                return result;
            }
            warn!(
                "Pipeline attempt {}/{} failed: {}",
                attempt,
                max_attempts,
                result.error.as_deref().unwrap_or("unknown error")
            );
            last = Some(result);
        }

        let mut result = last.unwrap_or_else(|| PipelineResult::failed(question, "no attempt ran".to_string(), 0));
        error!("❌ Pipeline failed after {} attempts", max_attempts);
        result.attempts = max_attempts;
        result.logs = records;
        result
    }

    async fn run_once(&self, question: &str, summarize: bool, log: &mut RunLog<'_>) -> PipelineResult {
        let prompt = build_sql_prompt(question, self.schema.text(), self.generator.catalog());

        let (draft, sql_attempts) = match self.generate_sql(&prompt, log).await {
            Ok(done) => done,
            Err((e, sql_attempts)) => {
                log.failure(None, PipelineStage::Failed, &e);
                return PipelineResult::failed(question, e.to_string(), sql_attempts);
            }
        };
        info!("Validated SQL: {}", draft.sql);

        let rows = match self.execute(&draft.sql, log).await {
            Ok(rows) => rows,
            Err(e) => {
                log.failure(None, PipelineStage::Failed, &e);
                let mut result = PipelineResult::failed(question, e.to_string(), sql_attempts);
                result.sql = Some(draft.sql);
                result.template_info = Some(draft.template_info);
                return result;
            }
        };
        log.stage(None, PipelineStage::Executed);
        info!("📊 Query returned {} rows", rows.len());

        let summary = if summarize {
            match self.summarizer.summarize(question, &draft.sql, &rows).await {
                Ok(summary) => {
                    log.stage(None, PipelineStage::Summarized);
                    Some(summary)
                }
                Err(e) => {
                    warn!("Summary failed: {}", e);
                    log.failure(None, PipelineStage::Summarized, &e);
                    log.failure(None, PipelineStage::Failed, &e);
                    let mut result = PipelineResult::failed(question, e.to_string(), sql_attempts);
                    result.sql = Some(draft.sql);
                    result.rows = rows;
                    result.template_info = Some(draft.template_info);
                    return result;
                }
            }
        } else {
            None
        };
        log.stage(None, PipelineStage::Done);

        PipelineResult {
            question: question.to_string(),
            sql: Some(draft.sql),
            rows,
            summary,
            success: true,
            error: None,
            attempts: 0,
            sql_attempts,
            logs: Vec::new(),
            template_info: Some(draft.template_info),
        }
    }

    /// Ask the model until its answer becomes valid SQL.
    ///
    /// Parse, parameter and validation failures regenerate; anything else
    /// ends the loop. Errors carry the number of attempts used.
    async fn generate_sql(
        &self,
        prompt: &str,
        log: &mut RunLog<'_>,
    ) -> std::result::Result<(Draft, usize), (PipelineError, usize)> {
        let max_attempts = self.config.generation_attempts.max(1);

        for attempt in 1..=max_attempts {
            info!("SQL generation attempt {}/{}", attempt, max_attempts);
            log.stage(Some(attempt), PipelineStage::Drafting);

            match self.draft_once(prompt, attempt, log).await {
                Ok(draft) => return Ok((draft, attempt)),
                Err(e) => {
                    log.failure(Some(attempt), failed_stage(&e), &e);
                    if !e.is_regenerable() {
                        warn!("SQL generation aborted: {}", e);
                        return Err((e, attempt));
                    }
                    warn!("SQL generation attempt {} rejected: {}", attempt, e);
                }
            }
        }

        Err((PipelineError::GenerationExhausted(max_attempts), max_attempts))
    }

    async fn draft_once(&self, prompt: &str, attempt: usize, log: &mut RunLog<'_>) -> Result<Draft> {
        let raw = self.llm.complete(prompt, SQL_MAX_TOKENS, SQL_TEMPERATURE).await?;

        let generated = self.generator.generate(&raw)?;
        log.stage(Some(attempt), PipelineStage::Parsed);
        log.stage(Some(attempt), PipelineStage::Rendered);

        let sql = self.mapper.apply(&generated.sql);
        log.stage(Some(attempt), PipelineStage::Mapped);

        SqlValidator::check(&sql, self.schema.allowed_tables())?;
        log.stage(Some(attempt), PipelineStage::Validated);

        Ok(Draft {
            sql,
            template_info: generated.template_info,
        })
    }

    async fn execute(&self, sql: &str, log: &mut RunLog<'_>) -> Result<Vec<Row>> {
        self.config
            .execution_retry
            .run(
                || self.db.run(sql),
                PipelineError::is_transient,
                |_, e| log.failure(None, PipelineStage::Executed, e),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_stage_mapping() {
        assert_eq!(failed_stage(&PipelineError::Parse("x".into())), PipelineStage::Parsed);
        assert_eq!(failed_stage(&PipelineError::MissingParameter(vec![])), PipelineStage::Rendered);
        assert_eq!(failed_stage(&PipelineError::Validation("x".into())), PipelineStage::Validated);
        assert_eq!(failed_stage(&PipelineError::UpstreamCall("x".into())), PipelineStage::Drafting);
        assert_eq!(failed_stage(&PipelineError::FatalExecution("x".into())), PipelineStage::Executed);
    }

    #[test]
    fn test_default_budgets() {
        let config = PipelineConfig::default();
        assert_eq!(config.generation_attempts, 6);
        assert_eq!(config.execution_retry.max_attempts, 3);
        assert_eq!(config.execution_retry.delay_for_retry(0), Duration::from_millis(500));
        assert_eq!(config.pipeline_attempts, 3);
    }
}
