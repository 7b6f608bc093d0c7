//! Prompts - text sent to the completion model
//!
//! The SQL prompt lists the template catalog, the parameters each template
//! needs, the schema, a few worked examples and the user's question. The
//! summary prompt asks for a fixed JSON shape over a preview of the rows.

use crate::db::Row;
use crate::templates::TemplateCatalog;

/// Rows shown to the summary model.
pub const SUMMARY_PREVIEW_ROWS: usize = 30;

const SQL_RULES: &str = r#"你是 SQL 生成助手。
策略：
- 优先从下方模板中选择最匹配的模板ID并提取参数；
- 模板都不合适时，可以直接生成一条 SELECT（自由模式）；
- 只使用给定 schema 中的表和字段；只写一条 SELECT；禁止分号和多语句；
- “最近/最新”一律按时间倒序。

输出严格 JSON，二选一：
- 模板：{"template_id": "M1", "params": {"person_name": "王飞"}, "score": 0.92}
- 自由：{"template_id": "free", "sql": "SELECT ...", "score": 0.0}"#;

const PARAM_GLOSSARY: &str = r#"参数说明：
- template_id：模板ID，取值 M1 / M2 / M3 / M4 / M5 / M6 / free
- person_name：人员姓名（如"王飞"），M1/M2/M3/M4 必填
- team_name：班组名称（如"武汉化工"、"第一班组"），M5 必填
- unit_name：单元名称或地点（如"对门山隧道"、"路基L21"），M6 必填
- date：日期，格式 YYYY-MM-DD，M6 必填；"2025年4月1号"这类写法也可以
- start_date / end_date：日期范围，可选
- limit：返回行数，可选，默认 20，最多 50
- sql：仅 free 模式使用，完整的 SELECT 语句；尽量选出姓名、日期、地点、作业内容、状态等业务字段，优先 INNER JOIN，使用 LEFT JOIN 时在 WHERE 中过滤掉 NULL
- score：0~1 的匹配度，free 模式可给 0.0"#;

const INTENT_HINTS: &str = r#"意图提示：
- 某人带班了什么 → M1；某人跟班了什么 → M2；某人最近做了什么（带班+跟班）→ M3；某人的详细信息 → M4
- 人名通常 2~4 个汉字；包含"班组"、"公司"或像组织名称的，是班组，用 M5 而不是 M2
- 问题同时给出日期和单元/地点，并询问管控计划 → M6；没有明确日期不要用 M6
- "跟班任务XXX的管控计划"或"带班任务XXX的管控计划" → free，通过作业记录表的工单ID关联每日管控计划"#;

const EXAMPLES: &str = r#"示例：
问：王飞最近带班了哪些工序？
{"template_id": "M1", "params": {"person_name": "王飞"}, "score": 0.95}

问：罗康康的跟班记录？
{"template_id": "M2", "params": {"person_name": "罗康康"}, "score": 0.94}

问：王飞最近做了什么（带班和跟班都要）？
{"template_id": "M3", "params": {"person_name": "王飞"}, "score": 0.93}

问：谢雁成的详细信息？
{"template_id": "M4", "params": {"person_name": "谢雁成"}, "score": 0.9}

问：第一班组的跟班作业？
{"template_id": "M5", "params": {"team_name": "第一班组"}, "score": 0.93}

问：2025年3月5号路基L21的管控计划详情？
{"template_id": "M6", "params": {"date": "2025-03-05", "unit_name": "路基L21"}, "score": 0.92}

问：跟班任务"掌子面初期支护"的管控计划是几号？
{"template_id": "free", "sql": "SELECT p.计划日期, p.状态, p.施工计划作业内容, g.重点部位_关键工序_特殊时段情况, g.日期, g.跟班人员 FROM 跟班作业记录表 AS g INNER JOIN 每日管控计划 AS p ON g.工单ID = p.ID WHERE g.重点部位_关键工序_特殊时段情况 LIKE '%掌子面初期支护%' ORDER BY COALESCE(p.FGC_CreateDate, p.计划日期, p.FGC_LastModifyDate) DESC", "score": 0.0}"#;

/// Build the question-to-SQL prompt.
pub fn build_sql_prompt(question: &str, schema_text: &str, catalog: &TemplateCatalog) -> String {
    format!(
        "{rules}\n\n可用模板列表：\n{templates}\n\n{glossary}\n\n{hints}\n\n可用的表结构：\n{schema}\n\n{examples}\n\n现在请回答：\n问：{question}\n输出（仅JSON，不要其他文字）：\n",
        rules = SQL_RULES,
        templates = catalog.describe_all(),
        glossary = PARAM_GLOSSARY,
        hints = INTENT_HINTS,
        schema = schema_text,
        examples = EXAMPLES,
        question = question,
    )
}

/// Build the summary prompt; the empty-result variant asks for a short reply.
pub fn build_summary_prompt(question: &str, sql: &str, rows: &[Row]) -> String {
    if rows.is_empty() {
        return format!(
            r#"你是数据总结助手。
用户问题：{question}
执行的SQL：{sql}
查询结果：空（0行数据）
请只输出 JSON：{{"summaryContent": "根据查询结果，没有找到相关数据。您可以提供更具体一些的问题吗？", "keyInfo": "", "recordOverview": "", "charts": []}}"#
        );
    }

    let shown = rows.len().min(SUMMARY_PREVIEW_ROWS);
    let preview = serde_json::to_string_pretty(&rows[..shown]).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"你是数据总结助手，总结是给管理者看的。
用户问题：{question}
执行的SQL：{sql}
查询结果：共找到 {total} 行数据（显示前{shown}行）
数据内容（JSON格式）：
{preview}

请基于实际数据用中文回答用户问题，说明数据的时间范围和关键信息；数据较多时说明只显示了部分结果。
只输出 JSON，字段依次为：
{{"summaryContent": "总结内容", "keyInfo": "关键信息", "recordOverview": "记录概览", "charts": []}}"#,
        total = rows.len(),
    )
}
