//! Command-line and environment configuration shared by both binaries.

use crate::db::DbSettings;
use crate::error::{PipelineError, Result};
use crate::llm::ApiType;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryPolicy;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct AppConfig {
    /// Schema description file shown to the model
    #[arg(long, env = "SCHEMA_PATH", default_value = "./data/schema_prompt.txt")]
    pub schema_path: PathBuf,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 3306)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "root")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "DB_NAME", default_value = "")]
    pub db_name: String,

    /// Base URL of the completion service, without the /v1 path
    #[arg(long, env = "LLM_ENDPOINT", default_value = "http://localhost:8000")]
    pub llm_endpoint: String,

    #[arg(long, env = "LLM_MODEL", default_value = "qwen")]
    pub llm_model: String,

    #[arg(long, env = "LLM_API_KEY", default_value = "", hide_env_values = true)]
    pub llm_api_key: String,

    /// chat or completion
    #[arg(long, env = "LLM_API_TYPE", default_value = "chat")]
    pub llm_api_type: String,

    #[arg(long, env = "GENERATION_ATTEMPTS", default_value_t = 6)]
    pub generation_attempts: usize,

    #[arg(long, env = "EXECUTION_ATTEMPTS", default_value_t = 3)]
    pub execution_attempts: usize,

    #[arg(long, env = "PIPELINE_ATTEMPTS", default_value_t = 3)]
    pub pipeline_attempts: usize,
}

impl AppConfig {
    pub fn api_type(&self) -> Result<ApiType> {
        self.llm_api_type.parse()
    }

    pub fn db_settings(&self) -> Result<DbSettings> {
        if self.db_name.trim().is_empty() {
            return Err(PipelineError::Config("database name is not set (DB_NAME)".to_string()));
        }
        Ok(DbSettings {
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            database: self.db_name.clone(),
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            generation_attempts: self.generation_attempts.max(1),
            execution_retry: RetryPolicy::fixed(self.execution_attempts.max(1), Duration::from_millis(500)),
            pipeline_attempts: self.pipeline_attempts.max(1),
            ..PipelineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: AppConfig,
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::parse_from([
            "nl2sql",
            "--db-name",
            "bridge",
            "--llm-api-type",
            "completion",
            "--generation-attempts",
            "2",
        ]);
        let config = cli.config;
        assert_eq!(config.api_type().unwrap(), ApiType::Completion);
        assert_eq!(config.db_settings().unwrap().database, "bridge");
        assert_eq!(config.pipeline_config().generation_attempts, 2);
        assert_eq!(config.pipeline_config().execution_retry.max_attempts, 3);
    }

    #[test]
    fn test_missing_database_name() {
        let config = TestCli::parse_from(["nl2sql", "--db-name", " "]).config;
        assert!(matches!(config.db_settings(), Err(PipelineError::Config(_))));
    }
}
