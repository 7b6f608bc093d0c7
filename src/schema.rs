//! Schema text shown to the model.
//!
//! The text lists each table under a `表名: <name>` header followed by field
//! bullets. The validator's table whitelist is read from those headers, so the
//! header format is a contract with whatever generates the file.

use crate::error::Result;
use regex::Regex;
use std::path::Path;
use tracing::warn;

lazy_static::lazy_static! {
    static ref TABLE_HEADER: Regex = Regex::new(r"(?i)表名[:：]\s*([\w`]+)").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct SchemaText {
    text: String,
    allowed_tables: Vec<String>,
}

impl SchemaText {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into().trim().to_string();
        let allowed_tables = TABLE_HEADER
            .captures_iter(&text)
            .map(|caps| caps[1].replace('`', ""))
            .collect();
        Self { text, allowed_tables }
    }

    /// Load the schema file; a missing file yields an empty schema and no whitelist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Schema file {} not found; table whitelist disabled", path.display());
            return Ok(Self::default());
        }
        let schema = Self::new(std::fs::read_to_string(path)?);
        if schema.is_empty() {
            warn!("Schema file {} is empty; fill in the table structure first", path.display());
        }
        Ok(schema)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn allowed_tables(&self) -> &[String] {
        &self.allowed_tables
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
