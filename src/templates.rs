//! SQL Template Catalog
//!
//! One versioned registry of parametrized SELECT templates. Every template
//! declares the parameters it cannot run without; the renderer fills the rest
//! from a default table.

use crate::error::{PipelineError, Result};
use crate::params::{Params, DEFAULT_LIMIT};
use itertools::Itertools;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Bumped whenever a template id, body or required-parameter list changes.
pub const CATALOG_VERSION: &str = "M-2";

/// Reserved template id selecting free-form SQL.
pub const FREE_TEMPLATE_ID: &str = "free";

lazy_static::lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    /// An open LIKE pattern literal ending right before a placeholder.
    static ref LIKE_OPEN: Regex = Regex::new(r"(?i)\bLIKE\s+'[^']*$").unwrap();
}

#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub id: &'static str,
    pub description: &'static str,
    pub sql: &'static str,
    pub required_params: &'static [&'static str],
}

static TEMPLATES: &[Template] = &[
    Template {
        id: "M1",
        description: "按姓名查询某人最近的带班记录（带班日期、带班作业工序及地点），按时间倒序",
        sql: "SELECT b.带班日期, b.带班作业工序及地点, b.带班开始时间, b.带班结束时间
FROM 带班作业记录表 AS b
JOIN 大桥局人员信息表 AS p ON b.带班人员档案编号 = p.档案编号
WHERE p.姓名 = '{person_name}'
ORDER BY COALESCE(b.FGC_CreateDate, b.带班日期, b.FGC_LastModifyDate) DESC
LIMIT {limit}",
        required_params: &["person_name"],
    },
    Template {
        id: "M2",
        description: "按姓名查询某人最近的跟班记录（日期、重点部位_关键工序_特殊时段情况），按时间倒序",
        sql: "SELECT g.日期, g.重点部位_关键工序_特殊时段情况, g.班组, g.定位地址
FROM 跟班作业记录表 AS g
JOIN 大桥局人员信息表 AS p ON g.跟班人员档案编号 = p.档案编号
WHERE p.姓名 = '{person_name}'
ORDER BY COALESCE(g.FGC_CreateDate, g.日期, g.FGC_LastModifyDate) DESC
LIMIT {limit}",
        required_params: &["person_name"],
    },
    Template {
        id: "M3",
        description: "按姓名合并查询某人的带班和跟班记录（时间、类型、人员、作业内容、发生日期），按时间倒序",
        sql: "SELECT ts AS 时间, 类型, 人员, 作业内容, 发生日期
FROM (
  SELECT COALESCE(b.FGC_CreateDate, b.带班日期, b.FGC_LastModifyDate) AS ts,
         '带班' AS 类型,
         p1.姓名 AS 人员,
         b.带班作业工序及地点 AS 作业内容,
         b.带班日期 AS 发生日期
  FROM 带班作业记录表 AS b
  JOIN 大桥局人员信息表 AS p1 ON b.带班人员档案编号 = p1.档案编号
  WHERE p1.姓名 = '{person_name}'
  UNION ALL
  SELECT COALESCE(g.FGC_CreateDate, g.日期, g.FGC_LastModifyDate) AS ts,
         '跟班' AS 类型,
         p2.姓名 AS 人员,
         g.重点部位_关键工序_特殊时段情况 AS 作业内容,
         g.日期 AS 发生日期
  FROM 跟班作业记录表 AS g
  JOIN 大桥局人员信息表 AS p2
    ON (g.跟班人员档案编号 = p2.档案编号 OR g.跟班人员 = p2.姓名)
  WHERE p2.姓名 = '{person_name}'
) AS t
ORDER BY ts DESC
LIMIT {limit}",
        required_params: &["person_name"],
    },
    Template {
        id: "M4",
        description: "按姓名查询人员详细信息（档案编号、岗位、职务、手机号、状态、所属部门、所属项目）",
        sql: "SELECT 档案编号, 姓名, 岗位, 职务, 手机号, 状态, 所属部门, 所属项目
FROM 大桥局人员信息表
WHERE 姓名 = '{person_name}'
LIMIT {limit}",
        required_params: &["person_name"],
    },
    Template {
        id: "M5",
        description: "按班组名称查询跟班记录（日期、重点部位_关键工序_特殊时段情况），按时间倒序",
        sql: "SELECT g.日期, g.重点部位_关键工序_特殊时段情况, g.跟班人员, t.班组, g.定位地址
FROM 跟班作业记录表 AS g
JOIN 班前讲话班组字典 AS t ON g.班组 = t.ID
WHERE t.班组 = '{team_name}'
ORDER BY COALESCE(g.FGC_CreateDate, g.日期, g.FGC_LastModifyDate) DESC
LIMIT {limit}",
        required_params: &["team_name"],
    },
    Template {
        id: "M6",
        description: "按日期和单元名称（地点）查询每日管控计划详情（计划状态、施工内容、分项名称等）",
        sql: "SELECT p.计划日期, p.状态, p.施工计划作业内容, p.分项名称, u.单元名称, p.管控责任人档案编号
FROM 每日管控计划 AS p
JOIN 责任单元 AS u ON p.责任单元ID = u.ID
WHERE p.计划日期 = '{date}' AND u.单元名称 LIKE '%{unit_name}%'
ORDER BY COALESCE(p.FGC_CreateDate, p.计划日期, p.FGC_LastModifyDate) DESC
LIMIT {limit}",
        required_params: &["date", "unit_name"],
    },
];

/// Fallback values for placeholders a response left out.
fn default_value(name: &str) -> Option<Value> {
    let value = match name {
        "person_name" | "team_name" | "unit_name" | "archive_no" | "date" | "target_date"
        | "department" | "keyword" | "phone" | "duty" | "status" | "project_name" => Value::from(""),
        "start_date" => Value::from("1900-01-01"),
        "end_date" => Value::from("2099-12-31"),
        "limit" => Value::from(DEFAULT_LIMIT),
        "regular_flag" => Value::from(1),
        _ => return None,
    };
    Some(value)
}

#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: &'static [Template],
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self { templates: TEMPLATES }
    }
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> &'static str {
        CATALOG_VERSION
    }

    pub fn get(&self, id: &str) -> Result<&Template> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| PipelineError::UnknownTemplate(id.to_string()))
    }

    pub fn all(&self) -> &[Template] {
        self.templates
    }

    /// One `- <id>: <description>` line per template, for the prompt.
    pub fn describe_all(&self) -> String {
        self.templates
            .iter()
            .map(|t| format!("- {}: {}", t.id, t.description))
            .join("\n")
    }
}

pub struct TemplateRenderer;

impl TemplateRenderer {
    /// Substitute normalized parameters into a template body.
    ///
    /// Values are spliced into the SQL text, not bound; text values get their
    /// quote and backslash characters escaped first. Inside a LIKE pattern
    /// `%` and `_` match themselves.
    pub fn render(template: &Template, params: &Params) -> Result<String> {
        let missing: Vec<String> = template
            .required_params
            .iter()
            .filter(|name| !is_present(params.get(**name)))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingParameter(missing));
        }

        let unfilled: Vec<String> = PLACEHOLDER
            .captures_iter(template.sql)
            .map(|caps| caps[1].to_string())
            .filter(|name| params.get(name).is_none() && default_value(name).is_none())
            .unique()
            .collect();
        if !unfilled.is_empty() {
            return Err(PipelineError::MissingParameter(unfilled));
        }

        let sql = PLACEHOLDER.replace_all(template.sql, |caps: &regex::Captures| {
            let name = &caps[1];
            let value = match params.get(name) {
                Some(v) if !v.is_null() => v.clone(),
                _ => default_value(name).unwrap_or(Value::Null),
            };
            let start = caps.get(0).map_or(0, |m| m.start());
            if LIKE_OPEN.is_match(&template.sql[..start]) {
                like_text(&value)
            } else {
                sql_text(&value)
            }
        });

        Ok(sql.into_owned())
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn sql_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.replace('\\', "\\\\").replace('\'', "''"),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Null => String::new(),
        other => other.to_string().replace('\\', "\\\\").replace('\'', "''"),
    }
}

/// Text for a LIKE pattern: wildcards and the escape character are escaped
/// for the pattern, then the whole value for the string literal.
fn like_text(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let pattern = text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    sql_text(&Value::String(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamNormalizer;
    use serde_json::json;

    fn params(value: Value) -> Params {
        ParamNormalizer::normalize_params(value.as_object().unwrap())
    }

    #[test]
    fn test_every_template_declares_required_params() {
        let catalog = TemplateCatalog::new();
        assert_eq!(catalog.all().len(), 6);
        for t in catalog.all() {
            assert!(!t.required_params.is_empty(), "{} has no required params", t.id);
            for p in t.required_params {
                assert!(t.sql.contains(&format!("{{{}}}", p)), "{} never uses {}", t.id, p);
            }
        }
    }

    #[test]
    fn test_unknown_template() {
        let catalog = TemplateCatalog::new();
        assert!(matches!(catalog.get("T1"), Err(PipelineError::UnknownTemplate(id)) if id == "T1"));
        assert!(catalog.get(FREE_TEMPLATE_ID).is_err());
    }

    #[test]
    fn test_describe_all_lists_each_template() {
        let text = TemplateCatalog::new().describe_all();
        assert_eq!(text.lines().count(), 6);
        assert!(text.lines().next().unwrap().starts_with("- M1: "));
    }

    #[test]
    fn test_render_by_name() {
        let catalog = TemplateCatalog::new();
        let sql = TemplateRenderer::render(catalog.get("M2").unwrap(), &params(json!({ "person_name": "张三" }))).unwrap();
        assert!(sql.contains("WHERE p.姓名 = '张三'"));
        assert!(sql.contains("DESC"));
        assert!(sql.ends_with("LIMIT 20"));
        assert!(!sql.contains('{'));
    }

    #[test]
    fn test_missing_params_reported_together() {
        let catalog = TemplateCatalog::new();
        let err = TemplateRenderer::render(catalog.get("M6").unwrap(), &params(json!({ "date": "" }))).unwrap_err();
        match err {
            PipelineError::MissingParameter(names) => assert_eq!(names, vec!["date", "unit_name"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_quotes_are_escaped() {
        let catalog = TemplateCatalog::new();
        let sql = TemplateRenderer::render(
            catalog.get("M4").unwrap(),
            &params(json!({ "person_name": "x' OR '1'='1", "limit": 5 })),
        )
        .unwrap();
        assert!(sql.contains("姓名 = 'x'' OR ''1''=''1'"));
        assert!(sql.ends_with("LIMIT 5"));
    }

    #[test]
    fn test_m6_renders_date_and_unit() {
        let catalog = TemplateCatalog::new();
        let sql = TemplateRenderer::render(
            catalog.get("M6").unwrap(),
            &params(json!({ "date": "2025年4月1号", "unit_name": "对门山隧道" })),
        )
        .unwrap();
        assert!(sql.contains("p.计划日期 = '2025-04-01'"));
        assert!(sql.contains("LIKE '%对门山隧道%'"));
    }

    #[test]
    fn test_like_wildcards_in_unit_name_match_literally() {
        let catalog = TemplateCatalog::new();
        let template = catalog.get("M6").unwrap();
        let sql = TemplateRenderer::render(
            template,
            &params(json!({ "date": "2025-04-01", "unit_name": "100%_段'" })),
        )
        .unwrap();
        assert!(sql.contains(r"LIKE '%100\\%\\_段''%'"), "{}", sql);
        // Equality placeholders keep plain quoting.
        assert!(sql.contains("p.计划日期 = '2025-04-01'"));
    }
}
