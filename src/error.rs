//! Error types for the form worker.

use std::time::Duration;

use uuid::Uuid;

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Lease protocol errors returned by the job queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The job exists but is not (or no longer) owned by the caller.
    /// Callers log this and abandon the job; it is never fatal.
    #[error("Job {job_id} is not owned by worker {worker_id}")]
    OwnershipConflict { job_id: Uuid, worker_id: String },

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl QueueError {
    pub fn is_ownership_conflict(&self) -> bool {
        matches!(self, Self::OwnershipConflict { .. })
    }
}

/// Errors raised by the page-control collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PageError {
    /// The element was detached or re-rendered between lookup and use.
    #[error("Element is stale or detached: {0}")]
    Stale(String),

    #[error("Page operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Unexpected script result: {0}")]
    InvalidResult(String),

    #[error("Page is closed")]
    Closed,

    #[error("Page backend error: {0}")]
    Backend(String),
}

impl PageError {
    /// Transient errors the locator resolver retries in place.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

/// Errors raised by the reasoning-service collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("Reasoning request failed: {0}")]
    RequestFailed(String),

    #[error("Reasoning service rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid response from reasoning service: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Screen-level failures surfaced by the fill controller.
#[derive(Debug, thiserror::Error)]
pub enum FillError {
    #[error("Validation errors remain after recovery: {}", fields.join(", "))]
    Validation { fields: Vec<String> },

    #[error("No next/continue control could be resolved")]
    AdvanceNotFound,

    #[error(transparent)]
    Page(#[from] PageError),

    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
}

/// Job-level errors raised by the executor.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} timed out after {timeout:?}")]
    Timeout { id: Uuid, timeout: Duration },

    #[error("Job {id} exceeded {max} screens without reaching review")]
    TooManyScreens { id: Uuid, max: u32 },

    #[error("Job {id} lease lost")]
    LeaseLost { id: Uuid },

    #[error("Job {id} has an invalid payload: {reason}")]
    InvalidPayload { id: Uuid, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_is_the_only_retryable_page_error() {
        assert!(PageError::Stale("detached".into()).is_stale());
        assert!(!PageError::Timeout(Duration::from_millis(10)).is_stale());
        assert!(!PageError::Closed.is_stale());
    }

    #[test]
    fn ownership_conflict_is_detectable() {
        let err = QueueError::OwnershipConflict {
            job_id: Uuid::nil(),
            worker_id: "w".into(),
        };
        assert!(err.is_ownership_conflict());
        assert!(!QueueError::NotFound(Uuid::nil()).is_ownership_conflict());
    }

    #[test]
    fn validation_error_lists_fields() {
        let err = FillError::Validation {
            fields: vec!["Email".into(), "Phone".into()],
        };
        assert_eq!(
            err.to_string(),
            "Validation errors remain after recovery: Email, Phone"
        );
    }
}
