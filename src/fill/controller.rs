//! Hybrid fill controller: one screen of a multi-screen form.
//!
//! Deterministic fillers run first on every round; the reasoning service is
//! consulted only for fields that are still empty, and never more than
//! `max_ai_calls` times per screen.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blocker::{BlockerClassifier, BlockerResult};
use crate::config::FillConfig;
use crate::error::{FillError, PageError};
use crate::fill::budget::FillBudget;
use crate::fill::deterministic::DeterministicFiller;
use crate::locator::LocatorResolver;
use crate::page::scripts::{self, FieldInfo, FieldKind, ScrollMetrics, ValidationMessage};
use crate::page::{Page, evaluate_as};
use crate::platform::{AnswerMap, PlatformAdapter};
use crate::reasoning::{ActContext, ReasoningService, UsageEvent, UsageSink};

/// Named states of the per-screen state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    EntryGuard,
    DeterministicPass,
    ObstacleCheck,
    AiPass,
    Scroll,
    Advance,
    ErrorRecovery,
}

impl FillState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntryGuard => "entry_guard",
            Self::DeterministicPass => "deterministic_pass",
            Self::ObstacleCheck => "obstacle_check",
            Self::AiPass => "ai_pass",
            Self::Scroll => "scroll",
            Self::Advance => "advance",
            Self::ErrorRecovery => "error_recovery",
        }
    }
}

/// Terminal outcome of one screen.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenOutcome {
    /// A next/continue control was clicked without validation errors.
    Advanced,
    /// The screen is a review or confirmation screen; nothing was filled.
    ReviewDetected,
    ObstacleDetected(BlockerResult),
}

/// Everything a screen needs to know about the job.
pub struct ScreenContext<'a> {
    pub page: &'a dyn Page,
    pub job_id: Option<Uuid>,
    /// Free-form task description.
    pub task: &'a str,
    /// Structured profile data handed to the reasoning service.
    pub profile: &'a serde_json::Value,
    pub answers: &'a AnswerMap,
    pub platform: &'a dyn PlatformAdapter,
}

pub struct HybridFillController {
    config: FillConfig,
    resolver: LocatorResolver,
    classifier: Arc<BlockerClassifier>,
    reasoning: Arc<dyn ReasoningService>,
    usage: Arc<dyn UsageSink>,
}

impl HybridFillController {
    pub fn new(
        config: FillConfig,
        resolver: LocatorResolver,
        classifier: Arc<BlockerClassifier>,
        reasoning: Arc<dyn ReasoningService>,
        usage: Arc<dyn UsageSink>,
    ) -> Self {
        Self {
            config,
            resolver,
            classifier,
            reasoning,
            usage,
        }
    }

    /// Drive one screen to a terminal outcome.
    pub async fn fill_screen(&self, ctx: &ScreenContext<'_>) -> Result<ScreenOutcome, FillError> {
        let page = ctx.page;
        let mut budget = FillBudget::from_config(&self.config);
        let mut state = FillState::EntryGuard;
        let mut recovery_used = false;
        let mut flagged: Vec<ValidationMessage> = Vec::new();
        let today = Utc::now().date_naive();
        let filler = DeterministicFiller::new(&self.resolver, ctx.answers, today);

        loop {
            debug!(
                state = state.name(),
                round = budget.scroll_round,
                ai_calls = budget.ai_calls,
                "Fill state"
            );

            state = match state {
                FillState::EntryGuard => {
                    let url = page.url().await?;
                    if ctx.platform.detect_page_state(&url).is_terminal() {
                        info!(%url, platform = ctx.platform.name(), "Review screen detected from URL");
                        return Ok(ScreenOutcome::ReviewDetected);
                    }
                    let snapshot = self.classifier.snapshot(page).await?;
                    if self.classifier.screen_purpose(&snapshot).is_terminal() {
                        info!(%url, "Review screen detected from page content");
                        return Ok(ScreenOutcome::ReviewDetected);
                    }
                    budget.next_round();
                    FillState::DeterministicPass
                }

                FillState::DeterministicPass => {
                    let first = budget.is_first_round();
                    if first {
                        self.scroll_to_top(page).await?;
                        match evaluate_as::<u64>(page, scripts::SUPPRESS_BANNERS, json!(null)).await {
                            Ok(0) => {}
                            Ok(hidden) => debug!(hidden, "Suppressed banners"),
                            Err(e) => debug!("Banner suppression failed: {}", e),
                        }
                    }
                    filler.run(page).await?;
                    if first {
                        self.scroll_to_top(page).await?;
                    }
                    FillState::ObstacleCheck
                }

                FillState::ObstacleCheck => {
                    if let Some(blocker) = self.classifier.detect(page).await? {
                        warn!(job_id = ?ctx.job_id, %blocker, "Obstacle detected, halting");
                        return Ok(ScreenOutcome::ObstacleDetected(blocker));
                    }
                    FillState::AiPass
                }

                FillState::AiPass => {
                    self.ai_pass(ctx, &mut budget).await?;
                    FillState::Scroll
                }

                FillState::Scroll => {
                    if self.scroll_round(page, &mut budget).await? {
                        FillState::DeterministicPass
                    } else {
                        FillState::Advance
                    }
                }

                FillState::Advance => {
                    if !self.click_advance(ctx).await {
                        return Err(FillError::AdvanceNotFound);
                    }
                    page.wait_for_timeout(self.config.settle_delay).await;

                    let errors: Vec<ValidationMessage> =
                        evaluate_as(page, scripts::VALIDATION_ERRORS, json!(null)).await?;
                    if errors.is_empty() {
                        info!(
                            job_id = ?ctx.job_id,
                            rounds = budget.scroll_round,
                            ai_calls = budget.ai_calls,
                            ai_remaining = budget.ai_remaining(),
                            "Screen advanced"
                        );
                        return Ok(ScreenOutcome::Advanced);
                    }
                    if recovery_used {
                        let fields = errors.iter().map(|e| e.subject().to_string()).collect();
                        return Err(FillError::Validation { fields });
                    }
                    warn!(job_id = ?ctx.job_id, count = errors.len(), "Validation errors after advance, recovering");
                    recovery_used = true;
                    flagged = errors;
                    FillState::ErrorRecovery
                }

                FillState::ErrorRecovery => {
                    self.scroll_to_flagged(page).await?;
                    filler.run(page).await?;
                    self.recovery_pass(ctx, &mut budget, &flagged).await?;
                    FillState::Advance
                }
            };
        }
    }

    /// Bring the first flagged field into view, or the top of the form when
    /// the page marks none.
    async fn scroll_to_flagged(&self, page: &dyn Page) -> Result<(), PageError> {
        match evaluate_as::<bool>(page, scripts::SCROLL_TO_INVALID, json!(null)).await {
            Ok(true) => {}
            Ok(false) => self.scroll_to_top(page).await?,
            Err(e) => {
                debug!("Could not locate flagged field: {}", e);
                self.scroll_to_top(page).await?;
            }
        }
        page.wait_for_timeout(self.config.settle_delay).await;
        Ok(())
    }

    async fn scroll_to_top(&self, page: &dyn Page) -> Result<(), PageError> {
        page.evaluate(scripts::SCROLL_TO, json!({ "y": 0 })).await?;
        Ok(())
    }

    /// Start another scroll round. Returns false at the bottom, on no
    /// progress or when the round budget is spent.
    async fn scroll_round(&self, page: &dyn Page, budget: &mut FillBudget) -> Result<bool, PageError> {
        if budget.rounds_remaining() == 0 {
            debug!(rounds = budget.scroll_round, "Scroll rounds exhausted");
            return Ok(false);
        }

        let before: ScrollMetrics = evaluate_as(page, scripts::SCROLL_METRICS, json!(null)).await?;
        if before.at_bottom(self.config.bottom_epsilon) {
            debug!(scroll_y = before.scroll_y, "At bottom of screen");
            return Ok(false);
        }

        let dy = (before.viewport_height * self.config.scroll_fraction).round();
        page.evaluate(scripts::SCROLL_BY, json!({ "dy": dy })).await?;
        page.wait_for_timeout(self.config.settle_delay).await;

        let after: ScrollMetrics = evaluate_as(page, scripts::SCROLL_METRICS, json!(null)).await?;
        if after.scroll_y <= before.scroll_y + 0.5 {
            debug!(scroll_y = after.scroll_y, "Scroll made no progress");
            return Ok(false);
        }

        budget.next_round();
        Ok(true)
    }

    /// One bounded AI call for the fields still empty in the viewport.
    async fn ai_pass(&self, ctx: &ScreenContext<'_>, budget: &mut FillBudget) -> Result<(), FillError> {
        let empty: Vec<FieldInfo> =
            evaluate_as(ctx.page, scripts::COLLECT_FIELDS, FieldKind::Empty.arg()).await?;
        if empty.is_empty() {
            debug!("No empty fields, skipping AI pass");
            return Ok(());
        }
        if !budget.try_consume_ai() {
            debug!(empty = empty.len(), "AI budget spent, leaving fields");
            return Ok(());
        }

        let first = self.resolver.resolve(ctx.page, &empty[0].descriptor).await;
        if let Some(handle) = first.handle
            && let Err(e) = handle.scroll_into_view().await
        {
            debug!("Could not scroll first empty field into view: {}", e);
        }

        let labels: Vec<String> = empty.iter().map(field_label).collect();
        let instruction = format!(
            "Fill the following empty form fields using the applicant profile: {}. \
             Do not submit or advance the form.",
            labels.join("; ")
        );
        self.act(ctx, "fill", &instruction).await;
        Ok(())
    }

    /// AI call focused on fields flagged by validation, within the same budget.
    async fn recovery_pass(
        &self,
        ctx: &ScreenContext<'_>,
        budget: &mut FillBudget,
        flagged: &[ValidationMessage],
    ) -> Result<(), FillError> {
        if flagged.is_empty() || !budget.try_consume_ai() {
            return Ok(());
        }
        let problems: Vec<String> = flagged
            .iter()
            .map(|e| {
                if e.field.is_empty() {
                    e.message.clone()
                } else {
                    format!("{}: {}", e.field, e.message)
                }
            })
            .collect();
        let instruction = format!(
            "Correct these form validation errors using the applicant profile: {}. \
             Do not submit or advance the form.",
            problems.join("; ")
        );
        self.act(ctx, "error_recovery", &instruction).await;
        Ok(())
    }

    /// Issue one `act`. Failures are logged; the screen carries on.
    async fn act(&self, ctx: &ScreenContext<'_>, purpose: &str, instruction: &str) {
        let act_ctx = ActContext::new()
            .with_prompt_context(ctx.task)
            .with_structured_data(ctx.profile.clone());

        match self.reasoning.act(instruction, &act_ctx).await {
            Ok(result) => {
                if let Some(usage) = &result.usage {
                    self.usage
                        .record(UsageEvent::from_usage(
                            ctx.job_id,
                            purpose,
                            self.reasoning.model_name(),
                            usage,
                        ))
                        .await;
                }
                if result.success {
                    debug!(purpose, duration_ms = result.duration_ms, "AI act completed");
                } else {
                    warn!(purpose, message = %result.message, "AI act reported failure");
                }
            }
            Err(e) => warn!(purpose, "AI act failed: {}", e),
        }
    }

    /// Click the first next/continue control that resolves.
    async fn click_advance(&self, ctx: &ScreenContext<'_>) -> bool {
        for descriptor in ctx.platform.advance_descriptors() {
            let resolved = self.resolver.resolve(ctx.page, &descriptor).await;
            let Some(handle) = resolved.handle else {
                continue;
            };
            match handle.click().await {
                Ok(()) => {
                    debug!(%descriptor, strategy = ?resolved.strategy, "Clicked advance control");
                    return true;
                }
                Err(e) => debug!(%descriptor, "Advance click failed: {}", e),
            }
        }
        false
    }
}

fn field_label(field: &FieldInfo) -> String {
    if !field.label.trim().is_empty() {
        field.label.trim().to_string()
    } else {
        field.descriptor.to_string()
    }
}
