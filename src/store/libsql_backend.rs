//! libSQL backend: async `JobStore` implementation.
//!
//! Supports local file and in-memory databases. Several worker processes may
//! open the same file; every lease transition is a single conditional UPDATE
//! whose affected-row count decides who won.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, QueueError};
use crate::job::{FailureCode, Job, JobOutcome, JobStatus, NewJob, clamp_timeout_secs};
use crate::reasoning::UsageEvent;
use crate::store::migrations;
use crate::store::traits::{JobStore, QueueSelector, ReapReport, UsageSummary};

/// Claim attempts before reporting an empty queue under heavy contention.
const MAX_CLAIM_ATTEMPTS: usize = 8;

/// How long a connection waits on a locked database file.
const BUSY_TIMEOUT_MS: u64 = 5_000;

const JOB_COLUMNS: &str = "id, kind, target_url, task, input_payload, status, owner, heartbeat_at, \
    retry_count, max_retries, priority, target_worker, tags, timeout_secs, error_code, \
    error_details, result, created_at, updated_at, started_at, finished_at";

const STALE_HEARTBEAT_DETAIL: &str = "exhausted retries after stale heartbeat";

/// libSQL job store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        // Several worker processes share the file.
        pragma(&conn, &format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}")).await?;
        pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Job store opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn fetch_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    /// Explain why a conditional update on an owned job touched no rows.
    async fn ownership_error(&self, job_id: Uuid, worker_id: &str) -> QueueError {
        match self.fetch_job(&job_id.to_string()).await {
            Ok(Some(_)) => QueueError::OwnershipConflict {
                job_id,
                worker_id: worker_id.to_string(),
            },
            Ok(None) => QueueError::NotFound(job_id),
            Err(e) => QueueError::Database(e),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn pragma(conn: &Connection, sql: &str) -> Result<(), DatabaseError> {
    // PRAGMAs that report their new value return a row, so use query().
    conn.query(sql, ())
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?;
    Ok(())
}

/// Canonical timestamp format: RFC 3339, UTC, fixed microsecond precision.
/// Fixed width keeps lexical order equal to chronological order in SQL.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_ts() -> String {
    fmt_ts(Utc::now())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.filter(|s| !s.is_empty()).map(|s| parse_datetime(&s))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(v) => libsql::Value::Text(v.to_string()),
        None => libsql::Value::Null,
    }
}

/// SQL `IN` list of the statuses matching `pred`.
fn status_set(pred: impl Fn(JobStatus) -> bool) -> String {
    let list: Vec<String> = JobStatus::ALL
        .into_iter()
        .filter(|s| pred(*s))
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    format!("({})", list.join(", "))
}

/// Owned statuses from which the state machine allows moving to `target`.
fn owned_sources_of(target: JobStatus) -> String {
    status_set(|s| s.is_owned() && s.can_transition_to(target))
}

fn query_err(op: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Map a libsql Row to a Job. Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("job.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Query(format!("job.id parse: {e}")))?;

    let kind: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("job.kind: {e}")))?;
    let target_url: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("job.target_url: {e}")))?;
    let task: String = row.get(3).unwrap_or_default();

    let input_str: String = row.get(4).unwrap_or_else(|_| "{}".to_string());
    let input = serde_json::from_str(&input_str)
        .map_err(|e| DatabaseError::Serialization(format!("job.input_payload: {e}")))?;

    let status_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("job.status: {e}")))?;
    let status = JobStatus::parse(&status_str).ok_or_else(|| {
        DatabaseError::Serialization(format!("job.status: unknown value {status_str:?}"))
    })?;

    let owner: Option<String> = row.get::<String>(6).ok();
    let heartbeat_at = parse_optional_datetime(row.get::<String>(7).ok());
    let retry_count = row.get::<i64>(8).unwrap_or(0).max(0) as u32;
    let max_retries = row.get::<i64>(9).unwrap_or(0).max(0) as u32;
    let priority: i64 = row.get(10).unwrap_or(0);
    let target_worker: Option<String> = row.get::<String>(11).ok();

    let tags_str: String = row.get(12).unwrap_or_else(|_| "[]".to_string());
    let tags: Vec<String> = serde_json::from_str(&tags_str).unwrap_or_default();

    let timeout_secs = row.get::<i64>(13).unwrap_or(0).max(0) as u64;
    let error_code: Option<String> = row.get::<String>(14).ok();
    let error_details: Option<String> = row.get::<String>(15).ok();
    let result = row
        .get::<String>(16)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok());

    let created_str: String = row
        .get(17)
        .map_err(|e| DatabaseError::Query(format!("job.created_at: {e}")))?;
    let updated_str: String = row
        .get(18)
        .map_err(|e| DatabaseError::Query(format!("job.updated_at: {e}")))?;

    Ok(Job {
        id,
        kind,
        target_url,
        task,
        input,
        status,
        owner,
        heartbeat_at,
        retry_count,
        max_retries,
        priority,
        target_worker,
        tags,
        timeout_secs,
        error_code,
        error_details,
        result,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        started_at: parse_optional_datetime(row.get::<String>(19).ok()),
        finished_at: parse_optional_datetime(row.get::<String>(20).ok()),
    })
}

// ── JobStore implementation ─────────────────────────────────────────

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Submission / read-back ──────────────────────────────────────

    async fn enqueue(&self, job: &NewJob) -> Result<Job, DatabaseError> {
        let id = Uuid::new_v4();
        let now = now_ts();
        let input = serde_json::to_string(&job.input)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let tags = serde_json::to_string(&job.tags)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO jobs (id, kind, target_url, task, input_payload, status, retry_count, max_retries, priority, target_worker, tags, timeout_secs, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id.to_string(),
                    job.kind.as_str(),
                    job.target_url.as_str(),
                    job.task.as_str(),
                    input,
                    job.max_retries as i64,
                    job.priority,
                    opt_text(job.target_worker.as_deref()),
                    tags,
                    clamp_timeout_secs(job.timeout_secs) as i64,
                    now,
                ],
            )
            .await
            .map_err(query_err("enqueue"))?;

        debug!(job_id = %id, kind = %job.kind, priority = job.priority, "Job enqueued");

        self.fetch_job(&id.to_string())
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "job".into(),
                id: id.to_string(),
            })
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        self.fetch_job(&id.to_string()).await
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE (?1 IS NULL OR status = ?1) \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![opt_text(status.map(|s| s.as_str())), limit as i64],
            )
            .await
            .map_err(query_err("list_jobs"))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_jobs"))? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    // ── Lease protocol ──────────────────────────────────────────────

    async fn claim(
        &self,
        worker_id: &str,
        selector: &QueueSelector,
    ) -> Result<Option<Job>, QueueError> {
        let conn = self.conn();

        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            let candidate: String = {
                let mut rows = conn
                    .query(
                        "SELECT id FROM jobs \
                         WHERE status = 'pending' \
                           AND (target_worker IS NULL OR target_worker = ?1) \
                           AND (?2 IS NULL OR kind = ?2) \
                         ORDER BY priority DESC, created_at ASC, rowid ASC \
                         LIMIT 1",
                        params![worker_id, opt_text(selector.kind.as_deref())],
                    )
                    .await
                    .map_err(query_err("claim"))?;

                match rows.next().await.map_err(query_err("claim"))? {
                    Some(row) => row.get(0).map_err(query_err("claim"))?,
                    None => return Ok(None),
                }
            };

            // Compare-and-swap: only one claimant can flip pending → running.
            let now = now_ts();
            let affected = conn
                .execute(
                    "UPDATE jobs SET status = 'running', owner = ?1, heartbeat_at = ?2, \
                     started_at = ?2, updated_at = ?2 \
                     WHERE id = ?3 AND status = 'pending' AND owner IS NULL",
                    params![worker_id, now, candidate.as_str()],
                )
                .await
                .map_err(query_err("claim"))?;

            if affected == 1 {
                let job = self.fetch_job(&candidate).await?.ok_or_else(|| {
                    DatabaseError::NotFound {
                        entity: "job".into(),
                        id: candidate.clone(),
                    }
                })?;
                info!(job_id = %job.id, worker_id, kind = %job.kind, "Job claimed");
                return Ok(Some(job));
            }

            debug!(worker_id, attempt, job_id = %candidate, "Lost claim race, retrying");
        }

        warn!(worker_id, "Claim contention exhausted attempts");
        Ok(None)
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let now = now_ts();
        let affected = self
            .conn()
            .execute(
                &format!(
                    "UPDATE jobs SET heartbeat_at = ?1, updated_at = ?1 \
                     WHERE id = ?2 AND owner = ?3 AND status IN {}",
                    status_set(|s| s.is_owned())
                ),
                params![now, job_id.to_string(), worker_id],
            )
            .await
            .map_err(query_err("heartbeat"))?;

        if affected == 0 {
            return Err(self.ownership_error(job_id, worker_id).await);
        }
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        outcome: &JobOutcome,
    ) -> Result<(), QueueError> {
        let (result, error_code, error_details) = match outcome {
            JobOutcome::Succeeded { result } => (
                Some(
                    serde_json::to_string(result)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                ),
                None,
                None,
            ),
            JobOutcome::Failed { code, details } => {
                (None, Some(code.as_str()), Some(details.as_str()))
            }
        };

        let now = now_ts();
        let affected = self
            .conn()
            .execute(
                &format!(
                    "UPDATE jobs SET status = ?1, owner = NULL, result = ?2, error_code = ?3, \
                     error_details = ?4, finished_at = ?5, updated_at = ?5 \
                     WHERE id = ?6 AND owner = ?7 AND status IN {}",
                    owned_sources_of(outcome.status())
                ),
                params![
                    outcome.status().as_str(),
                    opt_text(result.as_deref()),
                    opt_text(error_code),
                    opt_text(error_details),
                    now,
                    job_id.to_string(),
                    worker_id,
                ],
            )
            .await
            .map_err(query_err("complete"))?;

        if affected == 0 {
            return Err(self.ownership_error(job_id, worker_id).await);
        }

        info!(job_id = %job_id, worker_id, status = %outcome.status(), "Job completed");
        Ok(())
    }

    async fn release(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let now = now_ts();
        let affected = self
            .conn()
            .execute(
                &format!(
                    "UPDATE jobs SET status = 'pending', owner = NULL, heartbeat_at = NULL, \
                     updated_at = ?1 \
                     WHERE id = ?2 AND owner = ?3 AND status IN {}",
                    owned_sources_of(JobStatus::Pending)
                ),
                params![now, job_id.to_string(), worker_id],
            )
            .await
            .map_err(query_err("release"))?;

        if affected == 0 {
            return Err(self.ownership_error(job_id, worker_id).await);
        }

        info!(job_id = %job_id, worker_id, "Job released to pending");
        Ok(())
    }

    async fn release_all_owned_by(&self, worker_id: &str) -> Result<usize, QueueError> {
        let now = now_ts();
        let affected = self
            .conn()
            .execute(
                &format!(
                    "UPDATE jobs SET status = 'pending', owner = NULL, heartbeat_at = NULL, \
                     updated_at = ?1 \
                     WHERE owner = ?2 AND status IN {}",
                    owned_sources_of(JobStatus::Pending)
                ),
                params![now, worker_id],
            )
            .await
            .map_err(query_err("release_all_owned_by"))?;

        if affected > 0 {
            info!(worker_id, count = affected, "Released owned jobs");
        }
        Ok(affected as usize)
    }

    async fn reap_stale(&self, max_heartbeat_age: Duration) -> Result<ReapReport, QueueError> {
        let conn = self.conn();
        let max_age = chrono::Duration::from_std(max_heartbeat_age)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = fmt_ts(Utc::now() - max_age);

        let mut stale = Vec::new();
        {
            let mut rows = conn
                .query(
                    "SELECT id, heartbeat_at, retry_count, max_retries FROM jobs \
                     WHERE status = 'running' AND (heartbeat_at IS NULL OR heartbeat_at < ?1)",
                    params![cutoff],
                )
                .await
                .map_err(query_err("reap_stale"))?;

            while let Some(row) = rows.next().await.map_err(query_err("reap_stale"))? {
                let id: String = row.get(0).map_err(query_err("reap_stale"))?;
                let heartbeat: Option<String> = row.get::<String>(1).ok();
                let retry_count = row.get::<i64>(2).unwrap_or(0);
                let max_retries = row.get::<i64>(3).unwrap_or(0);
                stale.push((id, heartbeat, retry_count, max_retries));
            }
        }

        let mut report = ReapReport::default();
        for (id, heartbeat, retry_count, max_retries) in stale {
            let next_retry = retry_count + 1;
            let now = now_ts();
            let exhausted = next_retry >= max_retries;

            // Guarded on the observed heartbeat: a worker that heartbeats
            // between our SELECT and this UPDATE keeps its job.
            let affected = if exhausted {
                conn.execute(
                    "UPDATE jobs SET status = 'failed', owner = NULL, retry_count = ?1, \
                     error_code = ?2, error_details = ?3, finished_at = ?4, updated_at = ?4 \
                     WHERE id = ?5 AND status = 'running' AND heartbeat_at IS ?6",
                    params![
                        next_retry,
                        FailureCode::ExhaustedRetries.as_str(),
                        STALE_HEARTBEAT_DETAIL,
                        now,
                        id.as_str(),
                        opt_text(heartbeat.as_deref()),
                    ],
                )
                .await
            } else {
                conn.execute(
                    "UPDATE jobs SET status = 'pending', owner = NULL, heartbeat_at = NULL, \
                     retry_count = ?1, updated_at = ?2 \
                     WHERE id = ?3 AND status = 'running' AND heartbeat_at IS ?4",
                    params![next_retry, now, id.as_str(), opt_text(heartbeat.as_deref())],
                )
                .await
            }
            .map_err(query_err("reap_stale"))?;

            if affected == 0 {
                debug!(job_id = %id, "Stale job changed before reap, skipping");
                continue;
            }

            let job_id = Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::Query(format!("reap_stale id parse: {e}")))?;
            if exhausted {
                warn!(job_id = %job_id, retry_count = next_retry, "Stale job failed: retries exhausted");
                report.failed.push(job_id);
            } else {
                info!(job_id = %job_id, retry_count = next_retry, "Stale job requeued");
                report.requeued.push(job_id);
            }
        }

        Ok(report)
    }

    // ── Telemetry ───────────────────────────────────────────────────

    async fn record_usage(&self, event: &UsageEvent) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO ai_usage (id, job_id, purpose, model, input_tokens, output_tokens, cost, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Uuid::new_v4().to_string(),
                    opt_text(event.job_id.map(|id| id.to_string()).as_deref()),
                    event.purpose.as_str(),
                    event.model.as_str(),
                    event.input_tokens as i64,
                    event.output_tokens as i64,
                    event.cost.to_string(),
                    fmt_ts(event.created_at),
                ],
            )
            .await
            .map_err(query_err("record_usage"))?;
        Ok(())
    }

    async fn usage_for_job(&self, job_id: Uuid) -> Result<UsageSummary, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT input_tokens, output_tokens, cost FROM ai_usage WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(query_err("usage_for_job"))?;

        // Costs are summed as decimals in Rust; SQLite would sum them as floats.
        let mut summary = UsageSummary::default();
        while let Some(row) = rows.next().await.map_err(query_err("usage_for_job"))? {
            summary.calls += 1;
            summary.input_tokens += row.get::<i64>(0).unwrap_or(0).max(0) as u64;
            summary.output_tokens += row.get::<i64>(1).unwrap_or(0).max(0) as u64;
            let cost: String = row.get(2).unwrap_or_default();
            summary.total_cost += cost.parse::<Decimal>().unwrap_or(Decimal::ZERO);
        }
        Ok(summary)
    }
}
