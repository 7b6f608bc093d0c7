pub mod config;
pub mod db;
pub mod error;
pub mod field_mapper;
pub mod llm;
pub mod output_parser;
pub mod params;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod schema;
pub mod schema_dump;
pub mod sql_generator;
pub mod store;
pub mod summarizer;
pub mod templates;
pub mod test_questions;
pub mod validator;

pub use error::{PipelineError, Result};
pub use pipeline::{PipelineConfig, PipelineResult, QueryPipeline};
