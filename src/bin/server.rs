//! HTTP Server for the question-to-SQL pipeline
//! Simple HTTP server using tokio and basic HTTP handling
//!
//! POST   /api/query                 run a question, summary follows in the background
//! GET    /api/query-logs/<id>       attempt log of a query
//! GET    /api/query-summary/<id>    summary status and result
//! DELETE /api/query-summary/<id>    cancel a pending summary
//! GET    /api/test-questions         catalog of regression questions

use clap::Parser;
use nl2sql::config::AppConfig;
use nl2sql::db::MySqlDatabase;
use nl2sql::llm::LlmClient;
use nl2sql::schema::SchemaText;
use nl2sql::store::{QueryStore, SummaryTask};
use nl2sql::test_questions;
use nl2sql::QueryPipeline;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Parser)]
#[command(name = "nl2sql-server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind: String,

    #[command(flatten)]
    config: AppConfig,
}

struct AppState {
    pipeline: QueryPipeline,
    store: QueryStore,
}

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.config;

    info!("🚀 Starting nl2sql API server...");
    let schema = SchemaText::load(&config.schema_path)?;
    let llm = LlmClient::new(
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        config.llm_endpoint.clone(),
        config.api_type()?,
    )?;
    let db = MySqlDatabase::connect(&config.db_settings()?).await?;

    let state = Arc::new(AppState {
        pipeline: QueryPipeline::new(Arc::new(llm), Arc::new(db), schema).with_config(config.pipeline_config()),
        store: QueryStore::new(),
    });

    let listener = TcpListener::bind(&args.bind).await?;
    info!("✅ Server listening on {}", args.bind);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("📥 New connection from: {}", addr);
        tokio::spawn(handle_connection(Arc::clone(&state), stream));
    }
}

async fn handle_connection(state: Arc<AppState>, mut stream: TcpStream) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
    };
    let response = handle_request(&state, &request).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// Read headers, then as much body as `Content-Length` announces.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut data = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        let size = stream.read(&mut buffer).await?;
        if size == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..size]);

        if let Some(header_end) = find_header_end(&data) {
            let headers = String::from_utf8_lossy(&data[..header_end]);
            if data.len() >= header_end + 4 + content_length(&headers) {
                break;
            }
        }
        if data.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request too large"));
        }
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn request_body(request: &str) -> &str {
    request.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

async fn handle_request(state: &AppState, request: &str) -> String {
    let Some(request_line) = request.lines().next() else {
        return create_response(400, "Bad Request", "{}");
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/").trim_end_matches('/');

    match (method, path) {
        ("OPTIONS", _) => {
            // Handle CORS preflight
            create_response(200, "OK", "")
        }
        ("POST", "/api/query") => handle_query(state, request_body(request)).await,
        ("GET", "/api/test-questions") => test_questions_response(),
        ("GET", p) if p.starts_with("/api/query-logs/") => {
            let id = &p["/api/query-logs/".len()..];
            match parse_id(id).and_then(|id| state.store.query(&id)) {
                Some(record) => json_response(200, "OK", &json!(record)),
                None => not_found(id),
            }
        }
        ("GET", p) if p.starts_with("/api/query-summary/") => {
            let id = &p["/api/query-summary/".len()..];
            match parse_id(id).and_then(|id| state.store.summary_status(&id)) {
                Some(status) => json_response(200, "OK", &json!({ "query_id": id, "summary": status })),
                None => not_found(id),
            }
        }
        ("DELETE", p) if p.starts_with("/api/query-summary/") => {
            let id = &p["/api/query-summary/".len()..];
            match parse_id(id).and_then(|id| state.store.summary_task(&id)) {
                Some(task) => {
                    let cancelled = task.cancel();
                    json_response(200, "OK", &json!({ "query_id": id, "cancelled": cancelled, "summary": task.status() }))
                }
                None => not_found(id),
            }
        }
        _ => json_response(404, "Not Found", &json!({ "error": "Not found" })),
    }
}

async fn handle_query(state: &AppState, body: &str) -> String {
    let question = match serde_json::from_str::<QueryRequest>(body) {
        Ok(request) => request.question.trim().to_string(),
        Err(e) => {
            return json_response(400, "Bad Request", &json!({ "error": format!("Invalid JSON: {}", e) }));
        }
    };
    if question.is_empty() {
        return json_response(400, "Bad Request", &json!({ "error": "问题不能为空" }));
    }

    let result = state.pipeline.run_with(&question, false).await;
    let query_id = state.store.record(&result);

    if !result.success {
        return json_response(
            500,
            "Internal Server Error",
            &json!({
                "query_id": query_id,
                "success": false,
                "error": result.error,
                "attempts": result.attempts,
                "sql_attempts": result.sql_attempts,
            }),
        );
    }

    let summarizer = state.pipeline.summarizer().clone();
    let sql = result.sql.clone().unwrap_or_default();
    let rows = result.rows.clone();
    let summary_question = question.clone();
    state.store.attach_summary(
        query_id,
        SummaryTask::spawn(async move { summarizer.summarize(&summary_question, &sql, &rows).await }),
    );

    json_response(
        200,
        "OK",
        &json!({
            "query_id": query_id,
            "success": true,
            "question": result.question,
            "sql": result.sql,
            "rows": result.rows,
            "row_count": result.rows.len(),
            "attempts": result.attempts,
            "sql_attempts": result.sql_attempts,
            "template_info": result.template_info,
            "summary_status": "pending",
        }),
    )
}

fn test_questions_response() -> String {
    json_response(200, "OK", &json!({ "success": true, "questions": test_questions::all() }))
}

fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

fn not_found(id: &str) -> String {
    json_response(404, "Not Found", &json!({ "error": format!("Unknown query id: {}", id) }))
}

fn json_response(status: u16, status_text: &str, body: &serde_json::Value) -> String {
    create_response(status, status_text, &body.to_string())
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json; charset=utf-8\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, DELETE, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_counts_bytes() {
        let response = create_response(200, "OK", "{\"a\":\"王飞\"}");
        assert!(response.contains("Content-Length: 14\r\n"));
        assert!(response.ends_with("\r\n\r\n{\"a\":\"王飞\"}"));
    }

    #[test]
    fn test_request_parts() {
        let request = "POST /api/query HTTP/1.1\r\nHost: x\r\ncontent-length: 17\r\n\r\n{\"question\":\"hi\"}";
        let header_end = find_header_end(request.as_bytes()).unwrap();
        assert_eq!(content_length(&request[..header_end]), 17);
        assert_eq!(request_body(request), "{\"question\":\"hi\"}");
        assert!(parse_id("not-a-uuid").is_none());
    }

    #[test]
    fn test_test_questions_listing() {
        let response = test_questions_response();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let body: serde_json::Value = serde_json::from_str(request_body(&response)).unwrap();
        assert_eq!(body["success"], true);
        let questions = body["questions"].as_array().unwrap();
        assert_eq!(questions.len(), test_questions::all().len());
        assert_eq!(questions[0], json!({ "id": "基础-1", "category": "基础", "question": "吕昊的个人信息" }));
    }
}
