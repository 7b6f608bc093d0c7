//! SQL Generator - turns one model response into one SQL string
//!
//! A response normally names a catalog template and its parameters, or
//! carries a free-form SELECT. When neither path yields SQL, a bare `SELECT`
//! written straight into the response is accepted as a last resort.

use crate::error::{PipelineError, Result};
use crate::output_parser::{OutputParser, ParsedIntent};
use crate::params::Params;
use crate::templates::{TemplateCatalog, TemplateRenderer, FREE_TEMPLATE_ID};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

pub const FREE_DESCRIPTION: &str = "自由生成SQL（未使用预定义模板）";

lazy_static::lazy_static! {
    static ref SQL_LABEL: Regex = Regex::new(r"(?is)SQL[:：]\s*(.*)").unwrap();
    static ref FENCE: Regex = Regex::new(r"(?i)```(?:sql)?").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlSource {
    Template,
    Free,
    Literal,
}

/// Which template answered the question, reported back to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateInfo {
    pub template_id: String,
    pub description: String,
    pub params: Params,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub source: SqlSource,
    pub intent: Option<ParsedIntent>,
    pub template_info: TemplateInfo,
}

pub struct SqlGenerator {
    parser: OutputParser,
    catalog: TemplateCatalog,
}

impl Default for SqlGenerator {
    fn default() -> Self {
        Self::new(TemplateCatalog::new())
    }
}

impl SqlGenerator {
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self {
            parser: OutputParser::new(),
            catalog,
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn generate(&self, raw: &str) -> Result<GeneratedSql> {
        match self.from_intent(raw) {
            Ok(generated) => Ok(generated),
            Err(e @ PipelineError::TruncatedOutput(_)) => Err(e),
            Err(e @ (PipelineError::Parse(_)
            | PipelineError::MissingParameter(_)
            | PipelineError::UnknownTemplate(_))) => match literal_select(raw) {
                Some(sql) => {
                    warn!("Falling back to literal SQL in model output ({})", e);
                    Ok(GeneratedSql {
                        sql,
                        source: SqlSource::Literal,
                        intent: None,
                        template_info: free_info(0.0),
                    })
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn from_intent(&self, raw: &str) -> Result<GeneratedSql> {
        let intent = self.parser.parse(raw)?;

        if intent.template_id.is_empty() {
            return Err(PipelineError::Parse("model output has no template_id".to_string()));
        }

        if intent.is_free() {
            let Some(sql) = intent.free_sql.clone() else {
                return Err(PipelineError::UnknownTemplate(format!(
                    "{} (no sql given)",
                    FREE_TEMPLATE_ID
                )));
            };
            info!("📝 Free-form SQL selected (score {:.2})", intent.score);
            return Ok(GeneratedSql {
                sql: strip_statement_end(&sql),
                source: SqlSource::Free,
                template_info: free_info(intent.score),
                intent: Some(intent),
            });
        }

        let template = self.catalog.get(&intent.template_id)?;
        let sql = TemplateRenderer::render(template, &intent.params)?;
        info!("📋 Template {} selected (score {:.2})", template.id, intent.score);
        Ok(GeneratedSql {
            sql,
            source: SqlSource::Template,
            template_info: TemplateInfo {
                template_id: template.id.to_string(),
                description: template.description.to_string(),
                params: intent.params.clone(),
                score: intent.score,
            },
            intent: Some(intent),
        })
    }
}

fn free_info(score: f64) -> TemplateInfo {
    TemplateInfo {
        template_id: FREE_TEMPLATE_ID.to_string(),
        description: FREE_DESCRIPTION.to_string(),
        params: Params::new(),
        score,
    }
}

fn strip_statement_end(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

/// The text after `SQL:` (or the whole output) when it is a bare SELECT.
fn literal_select(raw: &str) -> Option<String> {
    let body = match SQL_LABEL.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    };
    let sql = strip_statement_end(&FENCE.replace_all(&body, ""));
    let is_select = sql
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"));
    is_select.then_some(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_selection() {
        let generated = SqlGenerator::default()
            .generate(r#"{"template_id":"M2","params":{"person_name":"张三"},"score":0.9}"#)
            .unwrap();
        assert_eq!(generated.source, SqlSource::Template);
        assert!(generated.sql.contains("WHERE p.姓名 = '张三'"));
        assert_eq!(generated.template_info.template_id, "M2");
        assert_eq!(generated.template_info.score, 0.9);
        assert_eq!(generated.template_info.params["person_name"], "张三");
    }

    #[test]
    fn test_free_sql_passes_through() {
        let generated = SqlGenerator::default()
            .generate(r#"{"template_id":"FREE","sql":"SELECT 1 FROM 每日管控计划;","score":0}"#)
            .unwrap();
        assert_eq!(generated.source, SqlSource::Free);
        assert_eq!(generated.sql, "SELECT 1 FROM 每日管控计划");
        assert_eq!(generated.template_info.description, FREE_DESCRIPTION);
    }

    #[test]
    fn test_missing_template_id_is_parse_error() {
        let err = SqlGenerator::default().generate(r#"{"params":{}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn test_free_without_sql_uses_literal() {
        let raw = "{\"template_id\":\"free\"}\nSQL: ```sql\nSELECT * FROM 跟班作业记录表;\n```";
        let generated = SqlGenerator::default().generate(raw).unwrap();
        assert_eq!(generated.source, SqlSource::Literal);
        assert_eq!(generated.sql, "SELECT * FROM 跟班作业记录表");
        assert_eq!(generated.template_info.template_id, FREE_TEMPLATE_ID);
    }

    #[test]
    fn test_plain_select_output() {
        let generated = SqlGenerator::default().generate("select 姓名 from 大桥局人员信息表").unwrap();
        assert_eq!(generated.source, SqlSource::Literal);
    }

    #[test]
    fn test_missing_parameter_without_literal_keeps_error() {
        let err = SqlGenerator::default()
            .generate(r#"{"template_id":"M6","params":{"unit_name":"路基L21"}}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingParameter(names) if names == vec!["date"]));
    }

    #[test]
    fn test_unknown_template_without_literal() {
        let err = SqlGenerator::default()
            .generate(r#"{"template_id":"T9","params":{}}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTemplate(id) if id == "T9"));
    }

    #[test]
    fn test_truncated_output_never_falls_back() {
        let err = SqlGenerator::default()
            .generate(r#"{"template_id":"M2","params":{"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::TruncatedOutput(_)));
    }
}
