use anyhow::Result;
use clap::Parser;
use nl2sql::config::AppConfig;
use nl2sql::db::MySqlDatabase;
use nl2sql::llm::LlmClient;
use nl2sql::schema::SchemaText;
use nl2sql::{PipelineResult, QueryPipeline};
use nl2sql::test_questions;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_WORDS: [&str; 4] = ["quit", "exit", "q", "退出"];

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Answer questions about the site records with generated SQL")]
struct Args {
    /// Ask one question and exit; without it an interactive prompt starts
    #[arg(short, long)]
    question: Option<String>,

    /// Run every catalog test question and report the success rate
    #[arg(long, conflicts_with = "question")]
    batch: bool,

    /// Where --batch writes its JSON report
    #[arg(long, default_value = "test_report.json")]
    report: PathBuf,

    #[command(flatten)]
    config: AppConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.config;

    let schema = SchemaText::load(&config.schema_path)?;
    info!("Schema loaded: {} tables", schema.allowed_tables().len());

    let llm = LlmClient::new(
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        config.llm_endpoint.clone(),
        config.api_type()?,
    )?;
    let db = MySqlDatabase::connect(&config.db_settings()?).await?;
    let pipeline = QueryPipeline::new(Arc::new(llm), Arc::new(db), schema).with_config(config.pipeline_config());

    if args.batch {
        let report = test_questions::run_batch(&pipeline, &test_questions::all()).await;
        println!("\n=== Test Report ===\n{}", report.render());
        std::fs::write(&args.report, serde_json::to_string_pretty(&report)?)?;
        println!("\n详细报告已保存到: {}", args.report.display());
        if !report.all_passed() {
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(question) = args.question {
        let result = pipeline.run(&question).await;
        print_result(&result);
        if !result.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("输入问题开始查询，输入 quit / exit / q / 退出 结束。");
    let stdin = std::io::stdin();
    loop {
        print!("\n问题> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
            break;
        }
        let result = pipeline.run(question).await;
        print_result(&result);
    }

    Ok(())
}

fn print_result(result: &PipelineResult) {
    println!("\n=== Query Result ===");
    if let Some(info) = &result.template_info {
        println!("Template: {} ({}), score {:.2}", info.template_id, info.description, info.score);
    }
    if let Some(sql) = &result.sql {
        println!("SQL: {}", sql);
    }
    println!("Attempts: {} (SQL generation: {})", result.attempts, result.sql_attempts);

    if !result.success {
        error!("Query failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        for record in result.logs.iter().filter(|r| r.failure.is_some()) {
            println!(
                "  [{}ms] attempt {} {:?}: {}",
                record.elapsed_ms,
                record.pipeline_attempt,
                record.stage,
                record.failure.as_deref().unwrap_or_default()
            );
        }
        return;
    }

    println!("Rows: {}", result.rows.len());
    for row in result.rows.iter().take(10) {
        println!("  {}", serde_json::to_string(row).unwrap_or_default());
    }
    if result.rows.len() > 10 {
        println!("  ... {} more", result.rows.len() - 10);
    }
    if let Some(summary) = &result.summary {
        println!("\n=== Summary ===\n{}", summary.summary_content);
        if !summary.key_info.is_empty() {
            println!("关键信息: {}", summary.key_info);
        }
    }
}
