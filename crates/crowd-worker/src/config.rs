//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrently running analyses
    pub max_concurrent_jobs: usize,
    /// Directory for uploaded videos awaiting analysis
    pub work_dir: PathBuf,
    /// Retention of terminal tasks; `None` keeps them for the process lifetime
    pub task_ttl: Option<Duration>,
    /// How often the reaper scans for expired tasks
    pub reap_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: std::env::temp_dir().join("crowd"),
            task_ttl: Some(Duration::from_secs(3600)), // 1 hour
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ttl_secs: u64 = std::env::var("TASK_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);

        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            task_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            reap_interval: Duration::from_secs(
                std::env::var("TASK_REAP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(60),
            ),
        }
    }
}
