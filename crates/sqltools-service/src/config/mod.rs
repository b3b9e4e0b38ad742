//! Configuration loading and resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use sqltools_batch::ExecutionOptions;

/// Overrides the default log directory.
pub const LOG_DIR_ENV: &str = "SQLTOOLS_LOG_DIR";

const LOG_FILE_PREFIX: &str = "sqltools";

/// Runtime options for a serving host.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    /// Spawn handlers registered as parallel instead of awaiting them.
    pub parallel_message_processing: bool,
    /// Serve on a Unix socket at this path instead of stdio.
    pub pipe: Option<PathBuf>,
    /// Evict finished queries idle for this long.
    pub query_idle_timeout: Option<Duration>,
    pub execution: ExecutionOptions,
}

impl HostOptions {
    /// How often idle queries are swept: a quarter of the timeout, clamped
    /// to between one second and one minute.
    pub fn eviction_interval(&self) -> Option<Duration> {
        self.query_idle_timeout.map(|idle| {
            (idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
        })
    }
}

/// `--query-idle-minutes` as a duration, saturating instead of overflowing.
pub fn from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

/// Resolve the directory log files are written to.
pub fn resolve_log_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }

    if let Ok(env_dir) = std::env::var(LOG_DIR_ENV) {
        if !env_dir.is_empty() {
            return PathBuf::from(env_dir);
        }
    }

    resolve_default_log_dir()
}

fn resolve_default_log_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".sqltools").join("logs")
}

/// `sqltools_<yyyymmdd>_<hhmmss>_<pid>.log`
pub fn log_file_name(at: DateTime<Local>, pid: u32) -> String {
    format!("{LOG_FILE_PREFIX}_{}_{pid}.log", at.format("%Y%m%d_%H%M%S"))
}

/// Full path of the log file for this process.
pub fn resolve_log_file(explicit_dir: Option<&Path>) -> PathBuf {
    resolve_log_dir(explicit_dir).join(log_file_name(Local::now(), std::process::id()))
}
