//! Database access
//!
//! The pipeline only needs "run this SELECT, give me JSON rows". `MySqlDatabase`
//! does that over a sqlx pool and sorts failures into transient ones (worth
//! another try) and fatal ones.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column as _, Row as _};
use std::time::Duration;
use tracing::{debug, info};

pub type Row = Map<String, Value>;

/// MySQL server errors worth retrying: lock wait timeout, deadlock,
/// server gone away, lost connection.
const TRANSIENT_MYSQL_CODES: [u16; 4] = [1205, 1213, 2006, 2013];

#[async_trait]
pub trait Database: Send + Sync {
    async fn run(&self, sql: &str) -> Result<Vec<Row>>;
}

#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

pub struct MySqlDatabase {
    pool: MySqlPool,
    query_timeout: Duration,
}

impl MySqlDatabase {
    /// Open the pool and check it with `SELECT 1`.
    pub async fn connect(settings: &DbSettings) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database)
            .charset("utf8mb4");

        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(classify)?;

        sqlx::query("SELECT 1").execute(&pool).await.map_err(classify)?;
        info!("✅ Connected to MySQL {}:{}/{}", settings.host, settings.port, settings.database);

        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(60),
        })
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn run(&self, sql: &str) -> Result<Vec<Row>> {
        debug!("Executing SQL: {}", sql);
        let rows = tokio::time::timeout(self.query_timeout, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|_| {
                PipelineError::TransientExecution(format!("query timed out after {:?}", self.query_timeout))
            })?
            .map_err(classify)?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

/// Sort a sqlx error into a transient or fatal execution error.
pub fn classify(error: sqlx::Error) -> PipelineError {
    let transient = match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|e| TRANSIENT_MYSQL_CODES.contains(&e.number())),
        _ => false,
    };
    if transient {
        PipelineError::TransientExecution(error.to_string())
    } else {
        PipelineError::FatalExecution(error.to_string())
    }
}

fn row_to_json(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .map(|column| (column.name().to_string(), column_value(row, column.ordinal())))
        .collect()
}

/// Decode one cell into a JSON-safe value: numbers stay numbers, decimals
/// become floats, temporal values become ISO text and bytes become text.
fn column_value(row: &MySqlRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<BigDecimal>, _>(index) {
        return v.and_then(|d| d.to_f64()).map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return v.map_or(Value::Null, |d| Value::from(d.format("%Y-%m-%dT%H:%M:%S").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(index) {
        return v.map_or(Value::Null, |d| Value::from(d.format("%Y-%m-%d").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(index) {
        return v.map_or(Value::Null, |t| Value::from(t.format("%H:%M:%S").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(Value::Null, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map_or(Value::Null, |bytes| Value::from(String::from_utf8_lossy(&bytes).into_owned()));
    }
    Value::Null
}
