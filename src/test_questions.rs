//! Fixed regression questions and the batch report built from running them.

use crate::pipeline::{PipelineResult, QueryPipeline};
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

const QUESTIONS: &[(&str, &str)] = &[
    ("基础-1", "吕昊的个人信息"),
    ("基础-2", "带班记录BM-00056对应的注意事项？"),
    ("基础-3", "查询最近10条工作记录？"),
    ("基础-4", "罗康康从3月到11月的所有工作内容"),
    ("基础-5", "桂晓明最近干了什么"),
    ("基础-6", "桂编号dce4c9af-191c-c94d624-aa2f-7fae2adfdee2的人做了什么"),
    ("基础-7", "罗康康做了什么"),
    ("基础-8", "桂晓明最近干了什么"),
    ("基础-9", "谁的带班次数最多"),
    ("基础-10", "谁的跟班次数最多"),
    ("基础-11", "谁的工作次数最多"),
    ("基础-12", "三月份，哪个项目里的带班次数最多？请按项目统计每个项目的带班总次数，并按次数从高到低排序，取前 5 名"),
    ("基础-13", "三月份，哪个项目里的工作次数最多？请按项目统计每个项目的总次数，并按次数从高到低排序，取前 5 名，同时工作分为跟班和带班统计"),
    ("基础-13.1", "三月份，哪个项目里的工作次数最多？请按项目统计每个项目的总次数，并按次数从高到低排序，取前 20 名，分给给出他们的带班和跟班次数"),
    ("基础-14", "工作次数最多的前三个人是谁？每个人工作了多少次"),
    ("基础-15", "罗康康带班和跟班次数分别是多少次"),
    ("基础-16", "岗位是‘单元长’的人员中，谁带班次数最多？列出前 3 名及各自的带班次数。"),
    ("基础-17", "2025 年全年，‘BM-00018’（所属项目为包含‘BM-00018）的人员中，综合工作量（带班+跟班次数之和）排名前 5 的人是谁？请给出他们的姓名、所属部门、带班次数、跟班次数和总次数。"),
    ("基础-18", "有没有人在同一天既带班又跟班？请列出这些日期、人员姓名，以及当天带班和跟班的作业内容"),
    ("基础-19", "有没有人在同一个工程上连续三天工作？请列出持续天数最多的工程名称、人员姓名和连续天数，连续工作开始结束时间，是跟班还是带班"),
    ("新增-1", "罗康康从3月到11月的跟班作业中的班组对应的工作地方"),
    ("新增-2", "罗康康从3月到11月的跟班作业对应的班组长"),
    ("新增-3", "贵州春桥（下构班组）跟了哪些作业"),
    ("新增-4", "2025年3月3号的管控计划有几个，每个的地点在哪"),
    ("新增-5", "2025年4月1号对门山隧道的管控计划详情"),
    ("新增-6", "跟班任务掌子面初期支护，仰拱衬砌的管控计划是几号"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestQuestion {
    pub id: &'static str,
    pub category: &'static str,
    pub question: &'static str,
}

/// Category is the id up to its first `-`, e.g. `基础-13.1` belongs to `基础`.
fn category_of(id: &str) -> &str {
    id.split_once('-').map_or("其他", |(category, _)| category)
}

/// Every catalog question, in catalog order.
pub fn all() -> Vec<TestQuestion> {
    QUESTIONS
        .iter()
        .map(|&(id, question)| TestQuestion {
            id,
            category: category_of(id),
            question,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub test_id: String,
    pub category: String,
    pub question: String,
    pub success: bool,
    pub sql: Option<String>,
    pub error: Option<String>,
    pub row_count: usize,
    pub attempts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub total: usize,
    pub success: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub success_rate: String,
    pub by_category: BTreeMap<String, CategoryStats>,
    pub results: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn new(results: Vec<BatchEntry>) -> Self {
        let total = results.len();
        let success = results.iter().filter(|r| r.success).count();
        let mut by_category: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for entry in &results {
            let stats = by_category.entry(entry.category.clone()).or_default();
            stats.total += 1;
            stats.success += usize::from(entry.success);
        }
        Self {
            total,
            success,
            failed: total - success,
            success_rate: percent(success, total),
            by_category,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Plain-text report: totals, per-category rates, then every failure.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("总测试数: {}", self.total),
            format!("成功: {} ({})", self.success, self.success_rate),
            format!("失败: {} ({})", self.failed, percent(self.failed, self.total)),
        ];
        for (category, stats) in &self.by_category {
            lines.push(format!(
                "  {}: {}/{} ({})",
                category,
                stats.success,
                stats.total,
                percent(stats.success, stats.total)
            ));
        }
        let failures = self.results.iter().filter(|r| !r.success).collect_vec();
        if !failures.is_empty() {
            lines.push("失败的测试:".to_string());
            for entry in failures {
                lines.push(format!("  - [{}] {}", entry.test_id, entry.question));
                if let Some(error) = &entry.error {
                    lines.push(format!("    错误: {}", error));
                }
            }
        }
        lines.join("\n")
    }
}

fn percent(part: usize, total: usize) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", part as f64 * 100.0 / total as f64)
}

fn entry(question: &TestQuestion, result: &PipelineResult) -> BatchEntry {
    BatchEntry {
        test_id: question.id.to_string(),
        category: question.category.to_string(),
        question: question.question.to_string(),
        success: result.success,
        sql: result.sql.clone(),
        error: result.error.clone(),
        row_count: result.rows.len(),
        attempts: result.attempts,
    }
}

/// Run each question through the full pipeline, one after another.
pub async fn run_batch(pipeline: &QueryPipeline, questions: &[TestQuestion]) -> BatchReport {
    let mut results = Vec::with_capacity(questions.len());
    for question in questions {
        info!("🧪 [{}] {}", question.id, question.question);
        let result = pipeline.run(question.question).await;
        if result.success {
            info!("✅ [{}] {} rows", question.id, result.rows.len());
        } else {
            warn!("❌ [{}] {}", question.id, result.error.as_deref().unwrap_or("unknown error"));
        }
        results.push(entry(question, &result));
    }
    BatchReport::new(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &'static str, success: bool) -> BatchEntry {
        BatchEntry {
            test_id: id.to_string(),
            category: category_of(id).to_string(),
            question: format!("question {}", id),
            success,
            sql: None,
            error: (!success).then(|| "SQL failed validation after 6 attempts".to_string()),
            row_count: 0,
            attempts: 1,
        }
    }

    #[test]
    fn test_catalog_ids_and_categories() {
        let questions = all();
        assert_eq!(questions.len(), 26);
        assert!(questions.iter().map(|q| q.id).all_unique());
        assert_eq!(questions[13].id, "基础-13.1");
        assert_eq!(questions[13].category, "基础");
        assert!(questions.iter().all(|q| q.category == "基础" || q.category == "新增"));
        assert_eq!(category_of("misc"), "其他");
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport::new(vec![outcome("基础-1", true), outcome("基础-2", false), outcome("新增-1", true)]);
        assert_eq!((report.total, report.success, report.failed), (3, 2, 1));
        assert_eq!(report.success_rate, "66.7%");
        assert_eq!(report.by_category["基础"], CategoryStats { total: 2, success: 1 });
        assert_eq!(report.by_category["新增"], CategoryStats { total: 1, success: 1 });
        assert!(!report.all_passed());

        let text = report.render();
        assert!(text.contains("成功: 2 (66.7%)"));
        assert!(text.contains("  - [基础-2] question 基础-2\n    错误: SQL failed validation after 6 attempts"));
    }

    #[test]
    fn test_empty_report() {
        let report = BatchReport::new(Vec::new());
        assert_eq!(report.success_rate, "0.0%");
        assert!(report.all_passed());
    }
}
