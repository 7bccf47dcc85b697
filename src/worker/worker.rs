//! Worker run loop: claim a job and execute it under a lease.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blocker::BlockerClassifier;
use crate::config::WorkerConfig;
use crate::error::{JobError, QueueError};
use crate::fill::HybridFillController;
use crate::job::{FailureCode, Job, JobOutcome};
use crate::locator::LocatorResolver;
use crate::page::PageFactory;
use crate::platform::PlatformRegistry;
use crate::reasoning::{ReasoningService, UsageSink};
use crate::store::{JobStore, QueueSelector};
use crate::worker::executor::JobExecutor;
use crate::worker::heartbeat::spawn_heartbeat;
use crate::worker::raised;

/// Shared dependencies for a worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub pages: Arc<dyn PageFactory>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub usage: Arc<dyn UsageSink>,
    pub platforms: Arc<PlatformRegistry>,
    pub classifier: Arc<BlockerClassifier>,
}

/// How a claimed job left this worker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobDisposition {
    /// Terminal outcome written to the store.
    Completed(JobOutcome),
    /// Ownership lost mid-run; nothing written.
    Abandoned,
    /// Returned to `pending` because the worker is shutting down.
    Released,
}

/// Which branch ended a job run.
enum Run {
    Finished(JobOutcome),
    LeaseLost,
    Shutdown,
}

/// Pulls jobs from the shared store and runs them one at a time.
pub struct Worker {
    config: WorkerConfig,
    selector: QueueSelector,
    store: Arc<dyn JobStore>,
    pages: Arc<dyn PageFactory>,
    executor: JobExecutor,
}

impl Worker {
    pub fn new(config: WorkerConfig, deps: WorkerDeps) -> Self {
        let controller = HybridFillController::new(
            config.fill.clone(),
            LocatorResolver::new(config.resolve.clone()),
            deps.classifier,
            deps.reasoning,
            deps.usage,
        );
        let executor = JobExecutor::new(Arc::new(controller), deps.platforms, config.max_screens);
        let selector = QueueSelector {
            kind: config.queue_kind.clone(),
        };
        Self {
            config,
            selector,
            store: deps.store,
            pages: deps.pages,
            executor,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    /// Poll until `shutdown` turns true, then release everything still owned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        info!(worker_id = %self.id(), kind = ?self.selector.kind, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(&mut shutdown).await {
                Ok(Some((_, JobDisposition::Released))) => break,
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker_id = %self.id(), "Claim failed: {}", e),
            }

            let delay = self.config.poll_interval + jitter(self.config.poll_jitter);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = raised(&mut shutdown) => break,
            }
        }

        let released = self.store.release_all_owned_by(self.id()).await?;
        info!(worker_id = %self.id(), released, "Worker stopped");
        Ok(())
    }

    /// Claim and process at most one job.
    pub async fn run_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<(Uuid, JobDisposition)>, QueueError> {
        let Some(job) = self.store.claim(self.id(), &self.selector).await? else {
            debug!(worker_id = %self.id(), "Queue empty");
            return Ok(None);
        };
        let disposition = self.process(&job, shutdown).await;
        Ok(Some((job.id, disposition)))
    }

    async fn process(&self, job: &Job, shutdown: &mut watch::Receiver<bool>) -> JobDisposition {
        let worker_id = self.id();
        let (lost_tx, mut lost_rx) = watch::channel(false);
        let _heartbeat = spawn_heartbeat(
            Arc::clone(&self.store),
            job.id,
            worker_id.to_string(),
            self.config.heartbeat_interval,
            lost_tx,
        );

        let page = match self.pages.open(job).await {
            Ok(page) => page,
            Err(e) => {
                let outcome = JobOutcome::failed(FailureCode::ExecutionError, e.to_string());
                return self.finish(job, outcome).await;
            }
        };

        let timeout = job.timeout();
        let run = tokio::select! {
            outcome = self.executor.run(job, page.as_ref()) => Run::Finished(outcome),
            _ = raised(&mut lost_rx) => Run::LeaseLost,
            _ = tokio::time::sleep(timeout) => {
                let err = JobError::Timeout { id: job.id, timeout };
                warn!(job_id = %job.id, "{}", err);
                Run::Finished(JobOutcome::failed(FailureCode::Timeout, err.to_string()))
            }
            _ = raised(shutdown) => Run::Shutdown,
        };
        self.pages.close(page).await;

        match run {
            Run::Finished(outcome) => self.finish(job, outcome).await,
            Run::LeaseLost => {
                warn!(job_id = %job.id, worker_id, "{}", JobError::LeaseLost { id: job.id });
                JobDisposition::Abandoned
            }
            Run::Shutdown => self.release(job).await,
        }
    }

    async fn finish(&self, job: &Job, mut outcome: JobOutcome) -> JobDisposition {
        if let JobOutcome::Succeeded { result } = &mut outcome {
            self.attach_usage(job.id, result).await;
        }

        match self.store.complete(job.id, self.id(), &outcome).await {
            Ok(()) => JobDisposition::Completed(outcome),
            Err(e) if e.is_ownership_conflict() => {
                warn!(job_id = %job.id, "Completion rejected, lease lost: {}", e);
                JobDisposition::Abandoned
            }
            Err(e) => {
                // The reaper will recover the job once the heartbeat goes stale.
                error!(job_id = %job.id, "Failed to record completion: {}", e);
                JobDisposition::Abandoned
            }
        }
    }

    async fn release(&self, job: &Job) -> JobDisposition {
        info!(job_id = %job.id, "Shutdown requested, releasing job");
        if let Err(e) = self.store.release(job.id, self.id()).await {
            warn!(job_id = %job.id, "Release failed: {}", e);
        }
        JobDisposition::Released
    }

    async fn attach_usage(&self, job_id: Uuid, result: &mut serde_json::Value) {
        match self.store.usage_for_job(job_id).await {
            Ok(usage) if usage.calls > 0 => {
                if let Some(obj) = result.as_object_mut() {
                    obj.insert(
                        "ai_usage".into(),
                        json!({
                            "calls": usage.calls,
                            "input_tokens": usage.input_tokens,
                            "output_tokens": usage.output_tokens,
                            "cost": usage.total_cost.to_string(),
                        }),
                    );
                }
            }
            Ok(_) => {}
            Err(e) => debug!(job_id = %job_id, "Usage lookup failed: {}", e),
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_bounded() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
    }
}
