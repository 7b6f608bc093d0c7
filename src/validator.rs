//! SQL Validator
//!
//! Syntactic allow-list gate in front of the database: one statement, read
//! only, and only whitelisted tables after `FROM`. It is not a parser and
//! rejects some valid but unusually formatted SQL.

use crate::error::{PipelineError, Result};
use regex::Regex;

lazy_static::lazy_static! {
    static ref FORBIDDEN_KEYWORD: Regex = Regex::new(
        r"(?i)\b(insert|update|delete|drop|truncate|alter|create|rename|grant|revoke)\b"
    ).unwrap();
    static ref FROM_TABLE: Regex = Regex::new(r#"(?i)\bfrom\s+([`"\w]+)"#).unwrap();
}

pub struct SqlValidator;

impl SqlValidator {
    pub fn validate(sql: &str, allowed_tables: &[String]) -> bool {
        Self::check(sql, allowed_tables).is_ok()
    }

    /// Like [`SqlValidator::validate`], but reports why the SQL was rejected.
    pub fn check(sql: &str, allowed_tables: &[String]) -> Result<()> {
        let trimmed = sql.trim();
        let starts_with_select = trimmed
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("select"));
        if !starts_with_select {
            return Err(PipelineError::Validation("statement must start with SELECT".to_string()));
        }

        if trimmed.contains(';') {
            return Err(PipelineError::Validation("statement separator ';' is not allowed".to_string()));
        }

        if let Some(m) = FORBIDDEN_KEYWORD.find(trimmed) {
            return Err(PipelineError::Validation(format!(
                "modifying keyword '{}' is not allowed",
                m.as_str().to_uppercase()
            )));
        }

        if !allowed_tables.is_empty() {
            let allowed: Vec<String> = allowed_tables.iter().map(|t| t.to_lowercase()).collect();
            for caps in FROM_TABLE.captures_iter(trimmed) {
                let table = caps[1].replace(['`', '"'], "").to_lowercase();
                if !allowed.contains(&table) {
                    return Err(PipelineError::Validation(format!(
                        "table '{}' is not in the whitelist",
                        table
                    )));
                }
            }
        }

        Ok(())
    }
}
