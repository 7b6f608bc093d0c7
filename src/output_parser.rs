//! Output Parser
//!
//! Recovers a structured intent from raw model text. Models wrap JSON in code
//! fences, prepend chatter, add comments, use single quotes or run out of
//! tokens mid-object, so extraction runs an ordered chain of strategies and
//! stops at the first one that yields an intent.

use crate::error::{PipelineError, Result};
use crate::params::{ParamNormalizer, Params};
use crate::templates::FREE_TEMPLATE_ID;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Confidence assigned when only the regex fallback matched.
pub const FALLBACK_SCORE: f64 = 0.5;

/// Parameter names the regex fallback knows how to pull out of broken JSON.
const KNOWN_PARAMS: [&str; 11] = [
    "person_name",
    "team_name",
    "unit_name",
    "archive_no",
    "date",
    "start_date",
    "end_date",
    "target_date",
    "phone",
    "duty",
    "status",
];

lazy_static::lazy_static! {
    static ref LEADING_FENCE: Regex = Regex::new(r"(?i)^```(?:json)?").unwrap();
    static ref TRAILING_FENCE: Regex = Regex::new(r"```$").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)//.*?$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref SINGLE_QUOTED_WORD: Regex = Regex::new(r"'(\w+)'").unwrap();
    static ref SINGLE_QUOTED_VALUE: Regex = Regex::new(r":\s*'([^']*)'").unwrap();
    static ref TEMPLATE_ID_FIELD: Regex = Regex::new(r#"(?i)"template_id"\s*:\s*"([^"]+)""#).unwrap();
    static ref PARAM_FIELDS: Vec<(&'static str, Regex)> = KNOWN_PARAMS
        .iter()
        .map(|key| {
            let pattern = format!(r#"(?i)"{}"\s*:\s*"([^"]+)""#, regex::escape(key));
            (*key, Regex::new(&pattern).unwrap())
        })
        .collect();
}

/// What the model asked for: a template with parameters, or free-form SQL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedIntent {
    pub template_id: String,
    pub params: Params,
    pub free_sql: Option<String>,
    pub score: f64,
}

impl ParsedIntent {
    pub fn is_free(&self) -> bool {
        self.template_id.eq_ignore_ascii_case(FREE_TEMPLATE_ID)
    }
}

/// One way of turning cleaned model text into an intent.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, cleaned: &str) -> Result<ParsedIntent>;
}

/// The whole cleaned text is one JSON object.
pub struct DirectJson;

impl ExtractionStrategy for DirectJson {
    fn name(&self) -> &'static str {
        "direct_json"
    }

    fn extract(&self, cleaned: &str) -> Result<ParsedIntent> {
        parse_intent_object(cleaned)
    }
}

/// The first balanced `{...}` span, ignoring surrounding prose.
pub struct BalancedObject;

impl ExtractionStrategy for BalancedObject {
    fn name(&self) -> &'static str {
        "balanced_object"
    }

    fn extract(&self, cleaned: &str) -> Result<ParsedIntent> {
        let span = first_balanced_object(cleaned)
            .ok_or_else(|| PipelineError::Parse("no balanced JSON object found".to_string()))?;
        parse_intent_object(span)
    }
}

/// Comments stripped and single quotes turned into double quotes.
pub struct RepairedJson;

impl ExtractionStrategy for RepairedJson {
    fn name(&self) -> &'static str {
        "repaired_json"
    }

    fn extract(&self, cleaned: &str) -> Result<ParsedIntent> {
        let repaired = repair_json(cleaned);
        if repaired == cleaned {
            return Err(PipelineError::Parse("nothing to repair".to_string()));
        }
        parse_intent_object(&repaired)
    }
}

/// Field-by-field regex scan, used when no structured parse worked.
pub struct FieldRegex;

impl ExtractionStrategy for FieldRegex {
    fn name(&self) -> &'static str {
        "field_regex"
    }

    fn extract(&self, cleaned: &str) -> Result<ParsedIntent> {
        let template_id = TEMPLATE_ID_FIELD
            .captures(cleaned)
            .map(|caps| caps[1].trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PipelineError::Parse(format!(
                    "cannot recover template id and params from model output: {}",
                    preview(cleaned, 200)
                ))
            })?;

        let mut params = Params::new();
        for (key, pattern) in PARAM_FIELDS.iter() {
            if let Some(caps) = pattern.captures(cleaned) {
                params.insert(key.to_string(), Value::from(caps[1].to_string()));
            }
        }

        Ok(ParsedIntent {
            template_id,
            params: ParamNormalizer::normalize_params(&params),
            free_sql: None,
            score: FALLBACK_SCORE,
        })
    }
}

pub struct OutputParser {
    structured: Vec<Box<dyn ExtractionStrategy>>,
    fallback: Box<dyn ExtractionStrategy>,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self {
            structured: vec![Box::new(DirectJson), Box::new(BalancedObject), Box::new(RepairedJson)],
            fallback: Box::new(FieldRegex),
        }
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one model response into an intent.
    ///
    /// Fails with `TruncatedOutput` when the text opens an object it never
    /// closes; the regex fallback is not trusted in that case.
    pub fn parse(&self, raw: &str) -> Result<ParsedIntent> {
        let cleaned = clean_model_output(raw);

        for strategy in &self.structured {
            match strategy.extract(&cleaned) {
                Ok(intent) => {
                    debug!("Model output parsed by {}", strategy.name());
                    return Ok(intent);
                }
                Err(e) => debug!("Strategy {} failed: {}", strategy.name(), e),
            }
        }

        if cleaned.starts_with('{') && !cleaned.ends_with('}') {
            return Err(PipelineError::TruncatedOutput(preview(&cleaned, 200)));
        }

        let search_text = if cleaned.is_empty() { raw } else { cleaned.as_str() };
        self.fallback.extract(search_text)
    }
}

/// Trim, drop a surrounding code fence and un-double escaped braces.
///
/// Braces are only un-doubled when the text carries a `{{`, so an ordinary
/// nested object ending in `}}` survives.
pub fn clean_model_output(raw: &str) -> String {
    let text = raw.trim();
    let text = LEADING_FENCE.replace(text, "");
    let text = text.trim();
    let text = TRAILING_FENCE.replace(text, "");
    let text = text.trim();
    if text.contains("{{") {
        text.replace("{{", "{").replace("}}", "}")
    } else {
        text.to_string()
    }
}

/// Byte span of the first balanced `{...}` object, skipping braces inside
/// string literals and escaped characters.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Light repairs for near-miss JSON: comments and single quotes.
pub fn repair_json(text: &str) -> String {
    let text = LINE_COMMENT.replace_all(text, "");
    let text = BLOCK_COMMENT.replace_all(&text, "");
    let text = SINGLE_QUOTED_WORD.replace_all(&text, "\"${1}\"");
    SINGLE_QUOTED_VALUE.replace_all(&text, ": \"${1}\"").into_owned()
}

fn parse_intent_object(text: &str) -> Result<ParsedIntent> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(intent_from_map(&map)),
        other => Err(PipelineError::Parse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn intent_from_map(data: &Map<String, Value>) -> ParsedIntent {
    let template_id = match data.get("template_id") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    };
    let is_template = !template_id.is_empty() && !template_id.eq_ignore_ascii_case(FREE_TEMPLATE_ID);

    let score = data
        .get("score")
        .and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|s| !s.is_nan())
        .map(|s| s.clamp(0.0, 1.0))
        .unwrap_or(if is_template { 1.0 } else { 0.0 });

    let free_sql = data
        .get("sql")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let params = match data.get("params") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(items)) => match items.first() {
            Some(Value::Object(map)) => map.clone(),
            _ => Params::new(),
        },
        _ => Params::new(),
    };

    ParsedIntent {
        template_id,
        params: ParamNormalizer::normalize_params(&params),
        free_sql,
        score,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}
