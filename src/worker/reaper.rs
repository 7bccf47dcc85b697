//! Stale-heartbeat reaper: the supervisor side of crash recovery.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ReaperConfig;
use crate::error::QueueError;
use crate::store::{JobStore, ReapReport};
use crate::worker::raised;

/// One reap pass.
pub async fn reap_once(store: &dyn JobStore, config: &ReaperConfig) -> Result<ReapReport, QueueError> {
    let report = store.reap_stale(config.stale_after).await?;
    if !report.is_empty() {
        info!(
            requeued = report.requeued.len(),
            failed = report.failed.len(),
            "Reaped stale jobs"
        );
    }
    Ok(report)
}

/// Spawn the reaper loop. The first pass runs immediately; the loop exits
/// when `shutdown` turns true.
pub fn spawn_reaper(
    store: Arc<dyn JobStore>,
    config: ReaperConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Reaper started (interval: {}s, stale after: {}s)",
            config.interval.as_secs(),
            config.stale_after.as_secs()
        );
        let mut tick = tokio::time::interval(config.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = reap_once(store.as_ref(), &config).await {
                        error!("Reap pass failed: {}", e);
                    }
                }
                _ = raised(&mut shutdown) => break,
            }
        }
        info!("Reaper stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::{JobStatus, NewJob};
    use crate::store::{LibSqlBackend, QueueSelector};

    #[tokio::test]
    async fn reaper_loop_requeues_and_stops() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .enqueue(&NewJob::new("apply", "https://example.com", "apply"))
            .await
            .unwrap();
        let job = store.claim("crashed", &QueueSelector::any()).await.unwrap().unwrap();

        let config = ReaperConfig {
            interval: Duration::from_millis(20),
            stale_after: Duration::ZERO,
        };
        let (tx, rx) = watch::channel(false);
        let handle = spawn_reaper(store.clone(), config, rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert!(fetched.owner.is_none());
        assert_eq!(fetched.retry_count, 1);
    }
}
