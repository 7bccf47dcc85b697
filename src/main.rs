use std::sync::Arc;

use anyhow::Context;
use form_worker::config::{self, ReaperConfig};
use form_worker::store::{JobStore, LibSqlBackend};
use form_worker::worker::spawn_reaper;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Supervisor process: owns the job database and runs the stale-heartbeat
/// reaper. Workers are embedded by the host that provides page control.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    eprintln!("Form Worker supervisor v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = config::database_path();
    let store: Arc<dyn JobStore> = Arc::new(
        LibSqlBackend::new_local(&db_path)
            .await
            .with_context(|| format!("failed to open job database at {}", db_path.display()))?,
    );
    eprintln!("   Database: {}", db_path.display());

    // ── Reaper ───────────────────────────────────────────────────────────
    let reaper_config = ReaperConfig::from_env();
    eprintln!(
        "   Reaper: every {}s, stale after {}s",
        reaper_config.interval.as_secs(),
        reaper_config.stale_after.as_secs()
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper = spawn_reaper(Arc::clone(&store), reaper_config, shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    reaper.await.context("reaper task panicked")?;

    Ok(())
}

/// Log to stderr, or to a daily-rolling file when `FORM_WORKER_LOG_DIR` is set.
/// The returned guard must stay alive so buffered lines are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("FORM_WORKER_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "form-worker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}
