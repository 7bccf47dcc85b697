//! `JobStore` trait: the single async interface to the shared job store.
//!
//! The store is the only cross-worker coordination point. Every lease
//! operation is a conditional update on `(id, owner, status)` so that two
//! workers can never both believe they own a job.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{DatabaseError, QueueError};
use crate::job::{Job, JobOutcome, JobStatus, NewJob};
use crate::reasoning::UsageEvent;

/// Which jobs a worker is willing to claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSelector {
    /// Restrict to one job kind; `None` accepts every kind.
    pub kind: Option<String>,
}

impl QueueSelector {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
        }
    }
}

/// Jobs touched by one `reap_stale` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Returned to `pending` for another attempt.
    pub requeued: Vec<Uuid>,
    /// Moved to `failed` because the retry budget ran out.
    pub failed: Vec<Uuid>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Aggregated reasoning-service usage for one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: Decimal,
}

/// Backend-agnostic job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Submission / read-back ──────────────────────────────────────

    /// Insert a new `pending` job.
    async fn enqueue(&self, job: &NewJob) -> Result<Job, DatabaseError>;

    /// Get a job by ID.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// List jobs, optionally filtered by status, newest first.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError>;

    // ── Lease protocol ──────────────────────────────────────────────

    /// Atomically claim the next eligible job for `worker_id`.
    ///
    /// Eligible: `pending`, affinity unset or equal to `worker_id`, kind
    /// accepted by `selector`. Highest priority first, then oldest first.
    async fn claim(
        &self,
        worker_id: &str,
        selector: &QueueSelector,
    ) -> Result<Option<Job>, QueueError>;

    /// Refresh the heartbeat of a job owned by `worker_id`.
    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError>;

    /// Record the terminal outcome of an owned job and clear its owner.
    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        outcome: &JobOutcome,
    ) -> Result<(), QueueError>;

    /// Return an owned job to `pending` without counting a retry.
    async fn release(&self, job_id: Uuid, worker_id: &str) -> Result<(), QueueError>;

    /// Release every job owned by `worker_id`. Returns the number released.
    async fn release_all_owned_by(&self, worker_id: &str) -> Result<usize, QueueError>;

    /// Recover `running` jobs whose heartbeat is older than `max_heartbeat_age`.
    async fn reap_stale(&self, max_heartbeat_age: Duration) -> Result<ReapReport, QueueError>;

    // ── Telemetry ───────────────────────────────────────────────────

    /// Persist one reasoning-service usage event.
    async fn record_usage(&self, event: &UsageEvent) -> Result<(), DatabaseError>;

    /// Sum usage recorded against a job.
    async fn usage_for_job(&self, job_id: Uuid) -> Result<UsageSummary, DatabaseError>;
}
