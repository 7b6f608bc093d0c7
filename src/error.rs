use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Parse error: {0}")]
    Parse(String),

    /// The model opened a JSON object and never closed it, usually because
    /// the completion hit its token limit.
    #[error("Truncated model output (JSON not closed): {0}")]
    TruncatedOutput(String),

    #[error("Missing template parameters: {}", .0.join(", "))]
    MissingParameter(Vec<String>),

    #[error("SQL validation failed: {0}")]
    Validation(String),

    /// Every generation attempt was rejected.
    #[error("SQL failed validation after {0} attempts")]
    GenerationExhausted(usize),

    #[error("Unknown template id: {0}")]
    UnknownTemplate(String),

    #[error("Transient execution error: {0}")]
    TransientExecution(String),

    #[error("Execution error: {0}")]
    FatalExecution(String),

    #[error("LLM error: {0}")]
    UpstreamCall(String),

    #[error("Summary error: {0}")]
    Summary(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Errors the generation loop absorbs by asking the model again.
    pub fn is_regenerable(&self) -> bool {
        matches!(
            self,
            PipelineError::Parse(_) | PipelineError::MissingParameter(_) | PipelineError::Validation(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientExecution(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_lists_all_names() {
        let err = PipelineError::MissingParameter(vec!["date".to_string(), "unit_name".to_string()]);
        assert_eq!(err.to_string(), "Missing template parameters: date, unit_name");
        assert_eq!(
            PipelineError::GenerationExhausted(6).to_string(),
            "SQL failed validation after 6 attempts"
        );
    }

    #[test]
    fn test_regenerable_classification() {
        assert!(PipelineError::Parse("x".into()).is_regenerable());
        assert!(PipelineError::Validation("x".into()).is_regenerable());
        assert!(!PipelineError::TruncatedOutput("x".into()).is_regenerable());
        assert!(!PipelineError::UpstreamCall("x".into()).is_regenerable());
        assert!(PipelineError::TransientExecution("x".into()).is_transient());
        assert!(!PipelineError::FatalExecution("x".into()).is_transient());
    }
}
