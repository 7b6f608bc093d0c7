//! Parameter Normalizer
//!
//! Canonicalizes the date-like strings and the row limit the model extracts
//! from a question before they reach a SQL template.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde_json::{Map, Value};

/// Parameter map as extracted from a model response (string → string|number).
pub type Params = Map<String, Value>;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 50;

lazy_static::lazy_static! {
    static ref DASH_RUN: Regex = Regex::new(r"-+").unwrap();
    static ref FULL_DATE: Regex = Regex::new(r"^([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})$").unwrap();
    static ref YEAR_MONTH: Regex = Regex::new(r"^([0-9]{4})-([0-9]{1,2})$").unwrap();
    static ref SHORT_YEAR: Regex = Regex::new(r"^([0-9]{2})-([0-9]{1,2})(?:-([0-9]{1,2}))?$").unwrap();
}

/// Date keys and whether each one closes a range.
const DATE_KEYS: [(&str, bool); 4] = [
    ("start_date", false),
    ("end_date", true),
    ("target_date", false),
    ("date", false),
];

#[derive(Debug, Clone, Default)]
pub struct ParamNormalizer;

impl ParamNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a date string to `YYYY-MM-DD`.
    ///
    /// Accepts `2025-10-01`, `2025-10`, `25-10`, `25-10-01`, `2025年10月`,
    /// `2025年10月1日` and `2025年4月1号`. A missing day resolves to the first
    /// of the month, or to its last day when `is_end` is set. Anything that is
    /// not a valid calendar date is returned unchanged.
    pub fn normalize_date(value: &str, is_end: bool) -> String {
        if value.is_empty() {
            return String::new();
        }

        let s = value
            .trim()
            .replace('年', "-")
            .replace('月', "-")
            .replace('日', "")
            .replace('号', "");
        let s = DASH_RUN.replace_all(&s, "-");
        let s = s.trim_matches('-');

        let (year, month, day): (i32, u32, Option<u32>) = if let Some(caps) = FULL_DATE.captures(s) {
            match (caps[1].parse(), caps[2].parse(), caps[3].parse()) {
                (Ok(y), Ok(m), Ok(d)) => (y, m, Some(d)),
                _ => return value.to_string(),
            }
        } else if let Some(caps) = YEAR_MONTH.captures(s) {
            match (caps[1].parse(), caps[2].parse()) {
                (Ok(y), Ok(m)) => (y, m, None),
                _ => return value.to_string(),
            }
        } else if let Some(caps) = SHORT_YEAR.captures(s) {
            let day = match caps.get(3) {
                Some(d) => match d.as_str().parse() {
                    Ok(d) => Some(d),
                    Err(_) => return value.to_string(),
                },
                None => None,
            };
            match (caps[1].parse::<i32>(), caps[2].parse()) {
                (Ok(y), Ok(m)) => (2000 + y, m, day),
                _ => return value.to_string(),
            }
        } else {
            return value.to_string();
        };

        if !(1..=12).contains(&month) {
            return value.to_string();
        }

        let day = match day {
            Some(d) => d,
            None if is_end => match last_day_of_month(year, month) {
                Some(d) => d,
                None => return value.to_string(),
            },
            None => 1,
        };

        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => value.to_string(),
        }
    }

    /// Normalize a parameter map. Every original key is kept.
    pub fn normalize_params(params: &Params) -> Params {
        let mut normalized = params.clone();

        normalized.insert("limit".to_string(), Value::from(normalize_limit(params.get("limit"))));

        for (key, is_end) in DATE_KEYS {
            if let Some(raw) = non_empty_str(params.get(key)) {
                normalized.insert(key.to_string(), Value::from(Self::normalize_date(raw, is_end)));
            }
        }

        // A lone start date closes over its own span: a month becomes the whole month.
        if non_empty_str(params.get("end_date")).is_none() {
            if let Some(raw_start) = non_empty_str(params.get("start_date")) {
                normalized.insert(
                    "end_date".to_string(),
                    Value::from(Self::normalize_date(raw_start, true)),
                );
            }
        }

        normalized
    }
}

fn normalize_limit(value: Option<&Value>) -> i64 {
    let limit = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match limit {
        Some(l) if l <= 0 => DEFAULT_LIMIT,
        Some(l) => l.min(MAX_LIMIT),
        None => DEFAULT_LIMIT,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    first_of_next.pred_opt().map(|d| d.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_chinese_year_month() {
        assert_eq!(ParamNormalizer::normalize_date("2025年10月", false), "2025-10-01");
        assert_eq!(ParamNormalizer::normalize_date("2025年10月", true), "2025-10-31");
        assert_eq!(ParamNormalizer::normalize_date("2025年4月1号", false), "2025-04-01");
        assert_eq!(ParamNormalizer::normalize_date("2025年3月5日", true), "2025-03-05");
    }

    #[test]
    fn test_short_year_and_padding() {
        assert_eq!(ParamNormalizer::normalize_date("25-3", false), "2025-03-01");
        assert_eq!(ParamNormalizer::normalize_date("25-3-7", true), "2025-03-07");
        assert_eq!(ParamNormalizer::normalize_date("2025--3--7", false), "2025-03-07");
    }

    #[test]
    fn test_leap_years() {
        assert_eq!(ParamNormalizer::normalize_date("2024-02", true), "2024-02-29");
        assert_eq!(ParamNormalizer::normalize_date("2025-02", true), "2025-02-28");
        assert_eq!(ParamNormalizer::normalize_date("1900-02", true), "1900-02-28");
        assert_eq!(ParamNormalizer::normalize_date("2000-02", true), "2000-02-29");
    }

    #[test]
    fn test_invalid_input_is_returned_unchanged() {
        assert_eq!(ParamNormalizer::normalize_date("2025-13", false), "2025-13");
        assert_eq!(ParamNormalizer::normalize_date("2025-02-30", false), "2025-02-30");
        assert_eq!(ParamNormalizer::normalize_date("last week", true), "last week");
        assert_eq!(ParamNormalizer::normalize_date("", true), "");
    }

    #[test]
    fn test_idempotent() {
        for d in ["2025-10-01", "2024-02-29", "1999-12-31"] {
            let once = ParamNormalizer::normalize_date(d, false);
            assert_eq!(once, d);
            assert_eq!(ParamNormalizer::normalize_date(&once, true), d);
        }
    }

    #[test]
    fn test_limit_clamping() {
        let cases = [(json!(0), 20), (json!(100), 50), (json!(-5), 20), (json!(10), 10), (json!("12"), 12), (json!("many"), 20)];
        for (input, expected) in cases {
            let out = ParamNormalizer::normalize_params(&params(json!({ "limit": input })));
            assert_eq!(out["limit"], json!(expected));
        }
        let out = ParamNormalizer::normalize_params(&Params::new());
        assert_eq!(out["limit"], json!(20));
    }

    #[test]
    fn test_start_date_only_spans_the_month() {
        let out = ParamNormalizer::normalize_params(&params(json!({ "start_date": "2025年3月", "person_name": "罗康康" })));
        assert_eq!(out["start_date"], json!("2025-03-01"));
        assert_eq!(out["end_date"], json!("2025-03-31"));
        assert_eq!(out["person_name"], json!("罗康康"));
    }

    #[test]
    fn test_start_day_only_stays_single_day() {
        let out = ParamNormalizer::normalize_params(&params(json!({ "start_date": "2025-03-05" })));
        assert_eq!(out["start_date"], json!("2025-03-05"));
        assert_eq!(out["end_date"], json!("2025-03-05"));
    }

    #[test]
    fn test_explicit_range_and_target() {
        let out = ParamNormalizer::normalize_params(&params(json!({
            "start_date": "2025-03",
            "end_date": "2025-11",
            "target_date": "25-4-1",
            "date": "2025年4月1号"
        })));
        assert_eq!(out["start_date"], json!("2025-03-01"));
        assert_eq!(out["end_date"], json!("2025-11-30"));
        assert_eq!(out["target_date"], json!("2025-04-01"));
        assert_eq!(out["date"], json!("2025-04-01"));
    }
}
