//! Configuration types.
//!
//! Every struct has a `Default` suitable for tests and a `from_env()` that
//! overlays `FORM_WORKER_*` environment variables, falling back to the default
//! when a variable is missing or unparsable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::locator::ResolveOptions;

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier written into `jobs.owner` for claimed jobs.
    pub worker_id: String,
    /// Only claim jobs of this kind (`None` = any kind).
    pub queue_kind: Option<String>,
    /// Delay between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Random jitter added to the poll interval so a fleet does not poll in lockstep.
    pub poll_jitter: Duration,
    /// How often the owning worker refreshes the heartbeat of a running job.
    pub heartbeat_interval: Duration,
    /// Upper bound on screens driven per job before giving up.
    pub max_screens: u32,
    /// Per-screen fill bounds.
    pub fill: FillConfig,
    /// Locator resolution bounds.
    pub resolve: ResolveOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            queue_kind: None,
            poll_interval: Duration::from_secs(2),
            poll_jitter: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
            max_screens: 20,
            fill: FillConfig::default(),
            resolve: ResolveOptions::default(),
        }
    }
}

impl WorkerConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_id: std::env::var("FORM_WORKER_ID").unwrap_or(defaults.worker_id),
            queue_kind: std::env::var("FORM_WORKER_QUEUE_KIND")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            poll_interval: env_millis("FORM_WORKER_POLL_INTERVAL_MS", defaults.poll_interval),
            poll_jitter: env_millis("FORM_WORKER_POLL_JITTER_MS", defaults.poll_jitter),
            heartbeat_interval: env_secs(
                "FORM_WORKER_HEARTBEAT_SECS",
                defaults.heartbeat_interval,
            ),
            max_screens: env_parse("FORM_WORKER_MAX_SCREENS", defaults.max_screens),
            fill: FillConfig::from_env(),
            resolve: ResolveOptions {
                timeout_per_strategy: env_millis(
                    "FORM_WORKER_RESOLVE_TIMEOUT_MS",
                    defaults.resolve.timeout_per_strategy,
                ),
                max_stale_retries: env_parse(
                    "FORM_WORKER_MAX_STALE_RETRIES",
                    defaults.resolve.max_stale_retries,
                ),
                stale_backoff: defaults.resolve.stale_backoff,
            },
        }
    }
}

/// Bounds for one screen of the hybrid fill controller.
#[derive(Debug, Clone)]
pub struct FillConfig {
    /// Total rounds per screen, the initial deterministic round included.
    pub max_scroll_rounds: u32,
    /// AI-assisted calls allowed per screen.
    pub max_ai_calls: u32,
    /// Fraction of the viewport scrolled per round. Below 1.0 so fields that
    /// straddle a viewport edge are seen twice rather than skipped.
    pub scroll_fraction: f64,
    /// Distance from the bottom (px) that counts as "at the bottom".
    pub bottom_epsilon: f64,
    /// Wait after scrolling or clicking for layout to settle.
    pub settle_delay: Duration,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            max_scroll_rounds: 8,
            max_ai_calls: 3,
            scroll_fraction: 0.65,
            bottom_epsilon: 4.0,
            settle_delay: Duration::from_millis(400),
        }
    }
}

impl FillConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_scroll_rounds: env_parse("FORM_WORKER_MAX_SCROLL_ROUNDS", defaults.max_scroll_rounds)
                .max(1),
            max_ai_calls: env_parse("FORM_WORKER_MAX_AI_CALLS", defaults.max_ai_calls),
            scroll_fraction: defaults.scroll_fraction,
            bottom_epsilon: defaults.bottom_epsilon,
            settle_delay: env_millis("FORM_WORKER_SETTLE_MS", defaults.settle_delay),
        }
    }
}

/// Stale-heartbeat reaper configuration (supervisor side).
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often the reaper scans for stale jobs.
    pub interval: Duration,
    /// Heartbeat age after which a running job is considered abandoned.
    pub stale_after: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
        }
    }
}

impl ReaperConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_secs("FORM_WORKER_REAP_INTERVAL_SECS", defaults.interval),
            stale_after: env_secs("FORM_WORKER_STALE_AFTER_SECS", defaults.stale_after),
        }
    }
}

/// Location of the shared job database.
pub fn database_path() -> PathBuf {
    std::env::var("FORM_WORKER_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/form-worker.db"))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(key, default.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_defaults_overlap_viewports() {
        let config = FillConfig::default();
        assert!((config.scroll_fraction - 0.65).abs() < f64::EPSILON);
        assert!(config.max_scroll_rounds >= 1);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse("FORM_WORKER_TEST_UNSET_VARIABLE", 7u32), 7);
    }

    #[test]
    fn default_worker_ids_are_unique() {
        let a = WorkerConfig::default();
        let b = WorkerConfig::default();
        assert_ne!(a.worker_id, b.worker_id);
    }
}
