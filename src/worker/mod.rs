//! Worker system: lease-protected job execution.
//!
//! Core components:
//! - `worker`: claim/execute/report loop with graceful shutdown
//! - `executor`: drives the fill controller across a job's screens
//! - `heartbeat`: per-job lease refresh task
//! - `reaper`: supervisor loop recovering jobs with stale heartbeats

pub mod executor;
pub mod heartbeat;
pub mod reaper;
pub mod worker;

use tokio::sync::watch;

pub use executor::JobExecutor;
pub use heartbeat::{HeartbeatGuard, spawn_heartbeat};
pub use reaper::{reap_once, spawn_reaper};
pub use worker::{JobDisposition, Worker, WorkerDeps};

/// Resolve once `flag` turns true. A dropped sender never resolves.
pub(crate) async fn raised(flag: &mut watch::Receiver<bool>) {
    let set = flag.wait_for(|set| *set).await.is_ok();
    if !set {
        std::future::pending::<()>().await;
    }
}
