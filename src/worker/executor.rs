//! Job executor: drives the fill controller across a job's screens.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::error::{FillError, JobError};
use crate::fill::{HybridFillController, ScreenContext, ScreenOutcome};
use crate::job::{FailureCode, Job, JobOutcome};
use crate::page::Page;
use crate::platform::PlatformRegistry;

pub struct JobExecutor {
    controller: Arc<HybridFillController>,
    platforms: Arc<PlatformRegistry>,
    max_screens: u32,
}

impl JobExecutor {
    pub fn new(
        controller: Arc<HybridFillController>,
        platforms: Arc<PlatformRegistry>,
        max_screens: u32,
    ) -> Self {
        Self {
            controller,
            platforms,
            max_screens: max_screens.max(1),
        }
    }

    /// Run `job` on an already-open page until review, failure or the
    /// screen limit.
    pub async fn run(&self, job: &Job, page: &dyn Page) -> JobOutcome {
        if !job.input.is_object() {
            let err = JobError::InvalidPayload {
                id: job.id,
                reason: "input payload must be a JSON object".into(),
            };
            return JobOutcome::failed(FailureCode::InvalidPayload, err.to_string());
        }

        if let Err(e) = page.navigate(&job.target_url).await {
            return JobOutcome::failed(FailureCode::ExecutionError, e.to_string());
        }

        let platform = self.platforms.for_url(&job.target_url);
        let answers = platform.answer_map(&job.input);
        info!(
            job_id = %job.id,
            platform = platform.name(),
            answers = answers.len(),
            "Executing job"
        );

        let ctx = ScreenContext {
            page,
            job_id: Some(job.id),
            task: &job.task,
            profile: &job.input,
            answers: &answers,
            platform: platform.as_ref(),
        };

        let mut screens_completed = 0u32;
        while screens_completed < self.max_screens {
            let outcome = match self.controller.fill_screen(&ctx).await {
                Ok(outcome) => outcome,
                Err(e) => return failure_for(job, e),
            };

            match outcome {
                ScreenOutcome::Advanced => {
                    screens_completed += 1;
                    info!(job_id = %job.id, screen = screens_completed, "Screen complete");
                }
                ScreenOutcome::ReviewDetected => {
                    let final_url = page.url().await.unwrap_or_default();
                    info!(job_id = %job.id, screens_completed, %final_url, "Reached review screen");
                    return JobOutcome::Succeeded {
                        result: json!({
                            "screens_completed": screens_completed,
                            "final_url": final_url,
                            "platform": platform.name(),
                        }),
                    };
                }
                ScreenOutcome::ObstacleDetected(blocker) => {
                    warn!(job_id = %job.id, %blocker, "Job halted by obstacle");
                    return JobOutcome::failed(
                        FailureCode::ObstacleDetected,
                        format!("{} obstacle detected: {blocker}", blocker.kind),
                    );
                }
            }
        }

        let err = JobError::TooManyScreens {
            id: job.id,
            max: self.max_screens,
        };
        warn!(job_id = %job.id, "{}", err);
        JobOutcome::failed(FailureCode::TooManyScreens, err.to_string())
    }
}

fn failure_for(job: &Job, err: FillError) -> JobOutcome {
    let code = match &err {
        FillError::Validation { .. } => FailureCode::ValidationFailed,
        FillError::AdvanceNotFound => FailureCode::AdvanceNotFound,
        FillError::Page(_) | FillError::Reasoning(_) => FailureCode::ExecutionError,
    };
    warn!(job_id = %job.id, code = %code, "Job failed: {}", err);
    JobOutcome::failed(code, err.to_string())
}
