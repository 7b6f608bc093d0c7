//! Request state for the HTTP front end.
//!
//! Each query gets an id under which its attempt log and its detached summary
//! task are kept until they expire or the store runs out of room.

use crate::error::Result;
use crate::pipeline::{AttemptRecord, PipelineResult};
use crate::summarizer::Summary;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SummaryStatus {
    Pending,
    Done { summary: Summary },
    Error { error: String },
    Cancelled,
}

impl SummaryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SummaryStatus::Pending)
    }
}

/// A summary computed in the background.
///
/// The status leaves `Pending` exactly once: the worker finishing and
/// [`SummaryTask::cancel`] race for that single write.
#[derive(Clone)]
pub struct SummaryTask {
    status: Arc<watch::Sender<SummaryStatus>>,
    abort: AbortHandle,
}

impl SummaryTask {
    pub fn spawn<F>(work: F) -> Self
    where
        F: Future<Output = Result<Summary>> + Send + 'static,
    {
        let (sender, _) = watch::channel(SummaryStatus::Pending);
        let status = Arc::new(sender);
        let worker_status = Arc::clone(&status);

        let handle = tokio::spawn(async move {
            let outcome = match work.await {
                Ok(summary) => SummaryStatus::Done { summary },
                Err(e) => {
                    warn!("Summary task failed: {}", e);
                    SummaryStatus::Error { error: e.to_string() }
                }
            };
            finish(&worker_status, outcome);
        });

        Self {
            status,
            abort: handle.abort_handle(),
        }
    }

    pub fn status(&self) -> SummaryStatus {
        self.status.borrow().clone()
    }

    /// Wait until the task is done, failed or cancelled.
    pub async fn wait(&self) -> SummaryStatus {
        let mut receiver = self.status.subscribe();
        let outcome = match receiver.wait_for(SummaryStatus::is_terminal).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        outcome
    }

    /// Stop the worker. Returns false when the task had already finished.
    pub fn cancel(&self) -> bool {
        let cancelled = finish(&self.status, SummaryStatus::Cancelled);
        if cancelled {
            self.abort.abort();
        }
        cancelled
    }
}

fn finish(status: &watch::Sender<SummaryStatus>, outcome: SummaryStatus) -> bool {
    status.send_if_modified(|current| {
        if current.is_terminal() {
            false
        } else {
            *current = outcome;
            true
        }
    })
}

/// What is kept about one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub query_id: Uuid,
    pub question: String,
    pub sql: Option<String>,
    pub success: bool,
    pub row_count: usize,
    pub logs: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
}

const DEFAULT_TTL_MINUTES: i64 = 60;
const DEFAULT_MAX_ENTRIES: usize = 1000;

pub struct QueryStore {
    queries: DashMap<Uuid, QueryRecord>,
    summaries: DashMap<Uuid, SummaryTask>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::with_limits(Duration::minutes(DEFAULT_TTL_MINUTES), DEFAULT_MAX_ENTRIES)
    }
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records older than `ttl` are dropped; at most `max_entries` are kept.
    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        Self {
            queries: DashMap::new(),
            summaries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Keep a finished pipeline run and return its id.
    ///
    /// Expired records go first; when the store is still full the oldest
    /// record makes room.
    pub fn record(&self, result: &PipelineResult) -> Uuid {
        self.evict_expired(Utc::now());
        while self.queries.len() >= self.max_entries {
            let oldest = self
                .queries
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| *entry.key());
            match oldest {
                Some(id) => self.remove(&id),
                None => break,
            }
        }

        let query_id = Uuid::new_v4();
        self.queries.insert(
            query_id,
            QueryRecord {
                query_id,
                question: result.question.clone(),
                sql: result.sql.clone(),
                success: result.success,
                row_count: result.rows.len(),
                logs: result.logs.clone(),
                created_at: Utc::now(),
            },
        );
        info!("Stored query {} ({} log entries)", query_id, result.logs.len());
        query_id
    }

    pub fn query(&self, query_id: &Uuid) -> Option<QueryRecord> {
        self.queries.get(query_id).map(|entry| entry.value().clone())
    }

    pub fn attach_summary(&self, query_id: Uuid, task: SummaryTask) {
        if let Some(previous) = self.summaries.insert(query_id, task) {
            previous.cancel();
        }
    }

    pub fn summary_task(&self, query_id: &Uuid) -> Option<SummaryTask> {
        self.summaries.get(query_id).map(|entry| entry.value().clone())
    }

    pub fn summary_status(&self, query_id: &Uuid) -> Option<SummaryStatus> {
        self.summaries.get(query_id).map(|entry| entry.value().status())
    }

    /// Drop records created more than `ttl` before `now`. Pending summaries
    /// of dropped records are cancelled. Returns how many records went.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let expired: Vec<Uuid> = self
            .queries
            .iter()
            .filter(|entry| entry.value().created_at < cutoff)
            .map(|entry| *entry.key())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        if !expired.is_empty() {
            info!("Evicted {} expired queries", expired.len());
        }
        expired.len()
    }

    fn remove(&self, query_id: &Uuid) {
        self.queries.remove(query_id);
        if let Some((_, task)) = self.summaries.remove(query_id) {
            task.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
