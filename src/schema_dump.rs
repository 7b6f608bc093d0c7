//! Schema export
//!
//! Reads table and column metadata from `information_schema` and renders the
//! schema description file that [`crate::schema::SchemaText`] loads.

use crate::db::classify;
use crate::error::{PipelineError, Result};
use itertools::Itertools;
use sqlx::mysql::MySqlPool;
use sqlx::Row as _;
use tracing::info;

/// Join keys and time conventions appended after the table listing.
pub const RELATIONSHIP_NOTES: &str = "关联关系与时间约定：
- 带班作业记录表.带班人员档案编号 与 大桥局人员信息表.档案编号 对应。
- 跟班作业记录表.跟班人员 与 大桥局人员信息表.姓名 对应。
- 带班作业记录表.联合带班人员档号 与 大桥局人员信息表.档案编号 对应。
- 跟班作业记录表.跟班人员档案编号 与 大桥局人员信息表.档案编号 对应。
- 若问题没指定时间范围，建议在 SQL 中按时间字段降序。
- 每日管控计划.ID 与 每日管控计划_子表.每日管控计划_ID 对应
- 每日管控计划_子表.工序id字符串 与 安全责任单元履职清单主表.ID 对应
- 每日管控计划.管控单元id 与 责任单元字典.ID 对应。
- 带班作业记录表.工单ID 与 每日管控计划.ID对应
- 带班作业记录表.工单子表ID 与 每日管控计划_子表.ID对应
- 跟班作业记录表.工单ID 与 每日管控计划.ID对应
- 跟班作业记录表.工单子表ID 与 每日管控计划_子表.ID对应
- 班前讲话班组字典.安全责任单元 与 责任单元字典.id 对应。
- 班前讲话班组字典.班组 与 跟班作业记录表.ID 对应";

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub table: String,
    pub name: String,
    pub column_type: String,
    pub comment: String,
}

/// Collapse a MySQL column type to a short name the model reads easily.
/// Unknown types pass through unchanged.
pub fn normalize_type(mysql_type: &str) -> String {
    let lower = mysql_type.to_lowercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| lower.starts_with(p));

    let normalized = if starts(&["varchar", "char"]) {
        "string"
    } else if starts(&["text"]) {
        "text"
    } else if starts(&["int", "tinyint", "smallint", "bigint"]) {
        "int"
    } else if starts(&["decimal", "float", "double"]) {
        "float"
    } else if starts(&["datetime", "timestamp"]) {
        "datetime"
    } else if starts(&["date"]) {
        "date"
    } else if starts(&["time"]) {
        "time"
    } else {
        return mysql_type.to_string();
    };
    normalized.to_string()
}

/// Render tables in the given order, each followed by its columns.
pub fn render_tables(tables: &[TableInfo], columns: &[ColumnInfo]) -> String {
    let by_table = columns.iter().into_group_map_by(|c| c.table.as_str());

    let mut lines = Vec::new();
    for table in tables {
        lines.push(format!("表名: {}", table.name));
        if !table.comment.is_empty() {
            lines.push(format!("表备注: {}", table.comment));
        }
        lines.push("字段:".to_string());
        for column in by_table.get(table.name.as_str()).into_iter().flatten() {
            let mut line = format!("- {} ({})", column.name, normalize_type(&column.column_type));
            if !column.comment.is_empty() {
                line.push_str(&format!(": {}", column.comment));
            }
            lines.push(line);
        }
        lines.push(String::new());
    }
    lines.join("\n").trim().to_string()
}

/// The whole schema file: table listing, a blank line, then the join notes.
pub fn render_schema_prompt(tables: &[TableInfo], columns: &[ColumnInfo]) -> String {
    format!("{}\n\n{}", render_tables(tables, columns), RELATIONSHIP_NOTES)
}

/// Read every table and column of `database`, ordered by table name and
/// column position.
pub async fn fetch_schema(pool: &MySqlPool, database: &str) -> Result<(Vec<TableInfo>, Vec<ColumnInfo>)> {
    let table_rows = sqlx::query(
        "SELECT CAST(table_name AS CHAR) AS table_name, CAST(table_comment AS CHAR) AS table_comment
         FROM information_schema.tables
         WHERE table_schema = ?
         ORDER BY table_name",
    )
    .bind(database)
    .fetch_all(pool)
    .await
    .map_err(classify)?;

    let column_rows = sqlx::query(
        "SELECT CAST(table_name AS CHAR) AS table_name, CAST(column_name AS CHAR) AS column_name,
                CAST(column_type AS CHAR) AS column_type, CAST(column_comment AS CHAR) AS column_comment
         FROM information_schema.columns
         WHERE table_schema = ?
         ORDER BY table_name, ordinal_position",
    )
    .bind(database)
    .fetch_all(pool)
    .await
    .map_err(classify)?;

    let text = |row: &sqlx::mysql::MySqlRow, name: &str| -> Result<String> {
        let value: Option<String> = row.try_get(name).map_err(classify)?;
        Ok(value.unwrap_or_default())
    };

    let tables = table_rows
        .iter()
        .map(|row| {
            Ok(TableInfo {
                name: text(row, "table_name")?,
                comment: text(row, "table_comment")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let columns = column_rows
        .iter()
        .map(|row| {
            Ok(ColumnInfo {
                table: text(row, "table_name")?,
                name: text(row, "column_name")?,
                column_type: text(row, "column_type")?,
                comment: text(row, "column_comment")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if tables.is_empty() {
        return Err(PipelineError::Config(format!(
            "no tables found in database '{}'; check DB_NAME and access to information_schema",
            database
        )));
    }
    info!("Read {} tables and {} columns from {}", tables.len(), columns.len(), database);
    Ok((tables, columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaText;

    fn table(name: &str, comment: &str) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            comment: comment.to_string(),
        }
    }

    fn column(table: &str, name: &str, column_type: &str, comment: &str) -> ColumnInfo {
        ColumnInfo {
            table: table.to_string(),
            name: name.to_string(),
            column_type: column_type.to_string(),
            comment: comment.to_string(),
        }
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("varchar(255)"), "string");
        assert_eq!(normalize_type("CHAR(36)"), "string");
        assert_eq!(normalize_type("text"), "text");
        assert_eq!(normalize_type("bigint unsigned"), "int");
        assert_eq!(normalize_type("tinyint(1)"), "int");
        assert_eq!(normalize_type("decimal(10,2)"), "float");
        assert_eq!(normalize_type("date"), "date");
        assert_eq!(normalize_type("datetime(3)"), "datetime");
        assert_eq!(normalize_type("timestamp"), "datetime");
        assert_eq!(normalize_type("time"), "time");
        assert_eq!(normalize_type("longtext"), "longtext");
        assert_eq!(normalize_type("json"), "json");
    }

    #[test]
    fn test_render_tables() {
        let tables = [table("大桥局人员信息表", "人员档案"), table("责任单元", "")];
        let columns = [
            column("责任单元", "ID", "int(11)", ""),
            column("大桥局人员信息表", "姓名", "varchar(50)", "姓名"),
            column("大桥局人员信息表", "入职日期", "datetime", ""),
        ];
        assert_eq!(
            render_tables(&tables, &columns),
            "表名: 大桥局人员信息表
表备注: 人员档案
字段:
- 姓名 (string): 姓名
- 入职日期 (datetime)

表名: 责任单元
字段:
- ID (int)"
        );
    }

    #[test]
    fn test_rendered_prompt_loads_as_schema() {
        let tables = [table("带班作业记录表", ""), table("每日管控计划", "")];
        let columns = [column("带班作业记录表", "带班日期", "date", "带班日期")];
        let prompt = render_schema_prompt(&tables, &columns);

        assert!(prompt.ends_with("- 班前讲话班组字典.班组 与 跟班作业记录表.ID 对应"));
        assert!(prompt.contains("- 带班日期 (date): 带班日期\n\n表名: 每日管控计划\n字段:\n\n关联关系与时间约定："));

        let schema = SchemaText::new(&prompt);
        assert_eq!(schema.allowed_tables(), ["带班作业记录表", "每日管控计划"]);
    }
}
