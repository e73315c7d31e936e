//! Tunables for the job service and the worker pool.

use std::path::PathBuf;
use std::time::Duration;

/// Per-user cap on QUEUED + RUNNING jobs.
pub const DEFAULT_MAX_ACTIVE_PER_USER: u64 = 100;
/// Expected wall-clock time of one docking run, used for waits and progress.
pub const DEFAULT_JOB_ESTIMATE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETENTION_DAYS: i64 = 7;
pub const DEFAULT_HISTORY_MAX_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub max_active_per_user: u64,
    pub job_estimate: Duration,
    /// Terminal jobs older than this are swept.
    pub retention: chrono::Duration,
    pub history_max_limit: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_active_per_user: DEFAULT_MAX_ACTIVE_PER_USER,
            job_estimate: DEFAULT_JOB_ESTIMATE,
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
            history_max_limit: DEFAULT_HISTORY_MAX_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Concurrent docking runs.
    pub workers: usize,
    /// How often the dispatcher polls for QUEUED jobs.
    pub dispatch_interval: Duration,
    /// How often a running job re-reads its persisted status.
    pub cancel_poll_interval: Duration,
    pub cleanup_interval: Duration,
    /// Parent of the per-job working directories.
    pub workspace: PathBuf,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            dispatch_interval: Duration::from_secs(5),
            cancel_poll_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60 * 60),
            workspace: PathBuf::from("./data/jobs"),
        }
    }
}
