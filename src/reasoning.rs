//! Reasoning-service collaborator.
//!
//! The fill controller escalates fields its deterministic fillers could not
//! handle to an injected `ReasoningService`. Every call may report token usage,
//! which is forwarded to a `UsageSink` for per-job cost tracking.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReasoningError;
use crate::store::JobStore;

/// Context handed to `act`.
#[derive(Debug, Clone, Default)]
pub struct ActContext {
    /// Free-form guidance prepended to the instruction.
    pub prompt_context: String,
    /// Structured data the service may draw answers from (the profile).
    pub structured_data: serde_json::Value,
}

impl ActContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt_context(mut self, prompt_context: impl Into<String>) -> Self {
        self.prompt_context = prompt_context.into();
        self
    }

    pub fn with_structured_data(mut self, data: serde_json::Value) -> Self {
        self.structured_data = data;
        self
    }
}

/// Token usage from one reasoning call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of an `act` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActResult {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// The reasoning model, as seen by the fill controller.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Model identifier, recorded with usage events.
    fn model_name(&self) -> &str;

    /// Perform page actions described by `instruction`.
    async fn act(&self, instruction: &str, ctx: &ActContext) -> Result<ActResult, ReasoningError>;

    /// Extract a value matching `schema` from the current page.
    async fn extract(
        &self,
        instruction: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ReasoningError>;
}

/// One persisted usage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub job_id: Option<Uuid>,
    /// What the call was for ("fill", "error_recovery", ...).
    pub purpose: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn from_usage(
        job_id: Option<Uuid>,
        purpose: impl Into<String>,
        model: impl Into<String>,
        usage: &TokenUsage,
    ) -> Self {
        Self {
            job_id,
            purpose: purpose.into(),
            model: model.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: usage.cost,
            created_at: Utc::now(),
        }
    }
}

/// Receives usage events. Recording is best-effort and never fails a job.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, event: UsageEvent);
}

/// Drops every event.
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _event: UsageEvent) {}
}

/// Persists usage events to the job store's `ai_usage` table.
pub struct StoreUsageSink {
    store: Arc<dyn JobStore>,
}

impl StoreUsageSink {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UsageSink for StoreUsageSink {
    async fn record(&self, event: UsageEvent) {
        if let Err(e) = self.store.record_usage(&event).await {
            tracing::warn!(
                job_id = ?event.job_id,
                purpose = %event.purpose,
                "Failed to record AI usage: {}",
                e
            );
        }
    }
}
