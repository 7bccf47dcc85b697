//! Job record and its lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Handed to a worker but not yet started.
    Queued,
    /// Owned by a worker that is heartbeating it.
    Running,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// Transitions only move forward, except the release-to-pending recovery
    /// path from an owned status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Queued) | (Pending, Running) |
            (Queued, Running) | (Queued, Succeeded) | (Queued, Failed) |
            (Running, Succeeded) | (Running, Failed) |
            // Recovery: graceful release or stale-heartbeat reap
            (Queued, Pending) | (Running, Pending)
        )
    }

    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Queued,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Statuses in which the job has an owner.
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse a status string from the DB. Unknown values map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// A captcha, login wall, 2FA prompt or bot check halted automation.
    ObstacleDetected,
    /// Validation errors survived the recovery round.
    ValidationFailed,
    /// The job's timeout budget ran out.
    Timeout,
    /// The reaper gave up after repeated stale heartbeats.
    ExhaustedRetries,
    /// Screen limit reached without arriving at review.
    TooManyScreens,
    /// No next/continue control could be located.
    AdvanceNotFound,
    /// Page or reasoning collaborator failed irrecoverably.
    ExecutionError,
    /// The input payload could not be used.
    InvalidPayload,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObstacleDetected => "obstacle_detected",
            Self::ValidationFailed => "validation_failed",
            Self::Timeout => "timeout",
            Self::ExhaustedRetries => "exhausted_retries",
            Self::TooManyScreens => "too_many_screens",
            Self::AdvanceNotFound => "advance_not_found",
            Self::ExecutionError => "execution_error",
            Self::InvalidPayload => "invalid_payload",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome reported by the owning worker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { result: serde_json::Value },
    Failed { code: FailureCode, details: String },
}

impl JobOutcome {
    pub fn failed(code: FailureCode, details: impl Into<String>) -> Self {
        Self::Failed {
            code,
            details: details.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded { .. } => JobStatus::Succeeded,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A persisted unit of form-filling work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub target_url: String,
    pub task: String,
    /// Arbitrary structured input, typically the applicant profile.
    pub input: serde_json::Value,
    pub status: JobStatus,
    pub owner: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: i64,
    /// Only this worker may claim the job, when set.
    pub target_worker: Option<String>,
    pub tags: Vec<String>,
    pub timeout_secs: u64,
    pub error_code: Option<String>,
    pub error_details: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(clamp_timeout_secs(self.timeout_secs))
    }

}

/// Longest per-job timeout accepted (one week).
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// A zero budget would time out before the first page call.
pub fn clamp_timeout_secs(secs: u64) -> u64 {
    secs.clamp(1, MAX_TIMEOUT_SECS)
}

/// Submission request for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub kind: String,
    pub target_url: String,
    pub task: String,
    pub input: serde_json::Value,
    pub target_worker: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub priority: i64,
    pub tags: Vec<String>,
}

impl NewJob {
    pub fn new(
        kind: impl Into<String>,
        target_url: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            target_url: target_url.into(),
            task: task.into(),
            input: serde_json::Value::Object(Default::default()),
            target_worker: None,
            timeout_secs: 900,
            max_retries: 3,
            priority: 0,
            tags: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.target_worker = Some(worker_id.into());
        self
    }

    /// Clamped to `1..=MAX_TIMEOUT_SECS`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = clamp_timeout_secs(timeout.as_secs());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_valid() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Succeeded));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn recovery_is_the_only_backward_transition() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn status_strings_match_serde() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn failure_code_display() {
        assert_eq!(FailureCode::ExhaustedRetries.to_string(), "exhausted_retries");
        assert_eq!(FailureCode::Timeout.to_string(), "timeout");
    }

    #[test]
    fn timeout_is_clamped() {
        let zero = NewJob::new("apply", "https://example.com", "apply").with_timeout(Duration::ZERO);
        assert_eq!(zero.timeout_secs, 1);
        let long = NewJob::new("apply", "https://example.com", "apply")
            .with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(long.timeout_secs, MAX_TIMEOUT_SECS);
    }

    #[test]
    fn new_job_builder() {
        let job = NewJob::new("apply", "https://example.com/apply", "Apply for role")
            .with_priority(5)
            .with_target_worker("worker-A")
            .with_timeout(Duration::from_secs(60));
        assert_eq!(job.priority, 5);
        assert_eq!(job.target_worker.as_deref(), Some("worker-A"));
        assert_eq!(job.timeout_secs, 60);
        assert_eq!(job.max_retries, 3);
    }
}
