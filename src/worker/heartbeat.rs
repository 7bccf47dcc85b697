//! Heartbeat task for a claimed job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::store::JobStore;

/// Aborts the wrapped task when dropped.
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Refresh the job's heartbeat every `interval` until aborted.
///
/// On ownership loss (the reaper took the job, or it no longer exists) the
/// task sends `true` on `lost` and exits. Other store errors are logged and
/// retried on the next tick.
pub fn spawn_heartbeat(
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    worker_id: String,
    interval: Duration,
    lost: watch::Sender<bool>,
) -> HeartbeatGuard {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick; claim just set the heartbeat.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.heartbeat(job_id, &worker_id).await {
                Ok(()) => debug!(job_id = %job_id, "Heartbeat"),
                Err(e @ (QueueError::OwnershipConflict { .. } | QueueError::NotFound(_))) => {
                    warn!(job_id = %job_id, worker_id = %worker_id, "Lease lost: {}", e);
                    let _ = lost.send(true);
                    return;
                }
                Err(e) => warn!(job_id = %job_id, "Heartbeat failed, retrying next tick: {}", e),
            }
        }
    });
    HeartbeatGuard { handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::store::{LibSqlBackend, QueueSelector};

    #[tokio::test]
    async fn heartbeat_signals_lost_lease() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .enqueue(&NewJob::new("apply", "https://example.com", "apply"))
            .await
            .unwrap();
        let job = store.claim("w1", &QueueSelector::any()).await.unwrap().unwrap();

        // Another owner takes over behind our back.
        store.release(job.id, "w1").await.unwrap();
        store.claim("w2", &QueueSelector::any()).await.unwrap().unwrap();

        let (tx, mut rx) = watch::channel(false);
        let _guard = spawn_heartbeat(
            store.clone(),
            job.id,
            "w1".into(),
            Duration::from_millis(20),
            tx,
        );

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|lost| *lost))
            .await
            .expect("lease loss not signalled")
            .unwrap();
    }

    #[tokio::test]
    async fn heartbeat_keeps_owned_job_fresh() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .enqueue(&NewJob::new("apply", "https://example.com", "apply"))
            .await
            .unwrap();
        let job = store.claim("w1", &QueueSelector::any()).await.unwrap().unwrap();
        let claimed_at = job.heartbeat_at.unwrap();

        let (tx, rx) = watch::channel(false);
        let guard = spawn_heartbeat(
            store.clone(),
            job.id,
            "w1".into(),
            Duration::from_millis(20),
            tx,
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        drop(guard);

        let fetched = store.get_job(job.id).await.unwrap().unwrap();
        assert!(fetched.heartbeat_at.unwrap() > claimed_at);
        assert!(!*rx.borrow());
    }
}
