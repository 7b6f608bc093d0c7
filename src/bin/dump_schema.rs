//! Export the database structure as the schema description file
//!
//! Run with: cargo run --bin dump_schema -- --out ./data/schema_prompt.txt

use anyhow::Context;
use clap::Parser;
use nl2sql::config::AppConfig;
use nl2sql::db::MySqlDatabase;
use nl2sql::schema_dump::{fetch_schema, render_schema_prompt};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dump_schema")]
#[command(about = "Write table and column descriptions read from information_schema")]
struct Args {
    /// Output file; defaults to the configured schema path
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print to standard output instead of writing a file
    #[arg(long)]
    stdout: bool,

    #[command(flatten)]
    config: AppConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    // Logs go to stderr so --stdout output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = args.config.db_settings()?;

    info!("📡 Connecting to database...");
    let db = MySqlDatabase::connect(&settings).await?;
    let (tables, columns) = fetch_schema(db.pool(), &settings.database).await?;
    let content = render_schema_prompt(&tables, &columns);

    if args.stdout {
        println!("{}", content);
        return Ok(());
    }

    let out = args.out.unwrap_or(args.config.schema_path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(&out, &content).with_context(|| format!("writing {}", out.display()))?;
    info!(
        "✅ Wrote {} ({} tables, {} bytes, {} lines)",
        out.display(),
        tables.len(),
        content.len(),
        content.lines().count()
    );
    Ok(())
}
