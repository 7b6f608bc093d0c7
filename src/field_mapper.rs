//! Field Mapper
//!
//! The schema text shown to the model names some columns differently from the
//! physical tables. Rendered SQL is rewritten to the physical names before
//! validation and execution.

use itertools::Itertools;
use regex::{Captures, Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::debug;

/// Logical (schema) field name → physical column name.
const DEFAULT_MAPPINGS: [(&str, &str); 3] = [
    ("带班人员档案编号", "带班人员"),
    ("带班领导档案编号", "带班领导"),
    ("管控责任人档案编号", "管控责任人"),
];

#[derive(Debug, Clone)]
pub struct FieldMapper {
    mappings: HashMap<String, String>,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self {
            mappings: DEFAULT_MAPPINGS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl FieldMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    pub fn with_mapping(mut self, logical: &str, physical: &str) -> Self {
        self.add_mapping(logical, physical);
        self
    }

    pub fn add_mapping(&mut self, logical: &str, physical: &str) {
        self.mappings.insert(logical.to_string(), physical.to_string());
    }

    pub fn mappings(&self) -> &HashMap<String, String> {
        &self.mappings
    }

    /// Rewrite every mapped field in `sql`.
    ///
    /// Keys are applied longest first so a name that contains a shorter key
    /// is replaced whole. Both `table.field` and bare `field` references are
    /// rewritten; neither may sit inside a longer identifier.
    pub fn apply(&self, sql: &str) -> String {
        if sql.is_empty() || self.mappings.is_empty() {
            return sql.to_string();
        }

        let mut result = sql.to_string();
        for (logical, physical) in self
            .mappings
            .iter()
            .sorted_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then_with(|| a.0.cmp(b.0)))
        {
            let Some((qualified, bare)) = patterns(logical) else {
                continue;
            };
            result = replace_scanned(&result, &qualified, |caps| format!("{}.{}", &caps["table"], physical));
            result = replace_scanned(&result, &bare, |_| physical.to_string());
        }

        if result != sql {
            debug!("Field mapping rewrote SQL: {}", result);
        }
        result
    }
}

fn patterns(logical: &str) -> Option<(Regex, Regex)> {
    let escaped = regex::escape(logical);
    let build = |pattern: &str| RegexBuilder::new(pattern).case_insensitive(true).build().ok();
    Some((build(&format!(r"(?P<table>[`\w]+)\.{}", escaped))?, build(&escaped)?))
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '`'
}

/// Replace every match of `pattern` that stands alone, scanning past matches
/// that are glued to other identifier characters on either side.
fn replace_scanned(sql: &str, pattern: &Regex, replacement: impl Fn(&Captures) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied_to = 0;
    let mut search_from = 0;

    while let Some(caps) = pattern.captures_at(sql, search_from) {
        let Some(m) = caps.get(0) else {
            break;
        };
        let before = sql[..m.start()].chars().next_back();
        let after = sql[m.end()..].chars().next();
        let standalone = !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char);

        if standalone {
            out.push_str(&sql[copied_to..m.start()]);
            out.push_str(&replacement(&caps));
            copied_to = m.end();
            search_from = m.end();
        } else {
            // Retry one character later; a valid match may overlap this one.
            search_from = m.start() + sql[m.start()..].chars().next().map_or(1, char::len_utf8);
        }
        if search_from >= sql.len() {
            break;
        }
    }
    out.push_str(&sql[copied_to..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mappings() {
        let mapper = FieldMapper::new();
        let sql = "SELECT b.带班日期 FROM 带班作业记录表 AS b JOIN 大桥局人员信息表 AS p ON b.带班人员档案编号 = p.档案编号";
        let mapped = mapper.apply(sql);
        assert_eq!(
            mapped,
            "SELECT b.带班日期 FROM 带班作业记录表 AS b JOIN 大桥局人员信息表 AS p ON b.带班人员 = p.档案编号"
        );
    }

    #[test]
    fn test_longest_key_wins() {
        let mapper = FieldMapper::empty().with_mapping("AB", "short").with_mapping("ABC", "long");
        assert_eq!(mapper.apply("SELECT t.ABC, ABC FROM t"), "SELECT t.long, long FROM t");
        assert_eq!(mapper.apply("SELECT t.AB FROM t WHERE AB = 1"), "SELECT t.short FROM t WHERE short = 1");
    }

    #[test]
    fn test_bare_match_respects_identifier_boundaries() {
        let mapper = FieldMapper::empty().with_mapping("人员", "person");
        assert_eq!(mapper.apply("SELECT 人员, 跟班人员 FROM t"), "SELECT person, 跟班人员 FROM t");
        assert_eq!(mapper.apply("SELECT 人员_id FROM t"), "SELECT 人员_id FROM t");
    }

    #[test]
    fn test_overlapping_candidate_after_rejected_match() {
        let mapper = FieldMapper::empty().with_mapping("aa", "X");
        assert_eq!(mapper.apply("SELECT aaa, aa FROM t"), "SELECT aaa, X FROM t");
    }

    #[test]
    fn test_ascii_case_insensitive() {
        let mapper = FieldMapper::empty().with_mapping("owner_id", "owner");
        assert_eq!(mapper.apply("SELECT T.OWNER_ID, Owner_Id FROM T"), "SELECT T.owner, owner FROM T");
    }

    #[test]
    fn test_quoted_table_prefix() {
        let mapper = FieldMapper::new();
        assert_eq!(
            mapper.apply("SELECT `每日管控计划`.管控责任人档案编号 FROM `每日管控计划`"),
            "SELECT `每日管控计划`.管控责任人 FROM `每日管控计划`"
        );
    }

    #[test]
    fn test_qualified_match_respects_trailing_boundary() {
        let mapper = FieldMapper::empty().with_mapping("AB", "X");
        assert_eq!(mapper.apply("SELECT t.ABD, ABD FROM t"), "SELECT t.ABD, ABD FROM t");
        assert_eq!(mapper.apply("SELECT t.AB, t.ABD FROM t"), "SELECT t.X, t.ABD FROM t");
        assert_eq!(mapper.apply("SELECT `t`.AB FROM t"), "SELECT `t`.X FROM t");
    }
}
