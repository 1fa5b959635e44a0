//! Default values and constants for all configuration settings.

use super::settings::*;
use std::path::PathBuf;
use std::time::Duration;

/// Default backup tool binary, resolved through PATH.
pub const DEFAULT_TOOL_BINARY: &str = "borg";

/// Default lock wait injected into every tool invocation (seconds).
pub const DEFAULT_LOCK_WAIT_SECS: u64 = 60;

/// Default supervision heartbeat interval (seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 3;

/// Default grace period before a cancelled process is force-killed (seconds).
pub const DEFAULT_TERMINATION_GRACE_SECS: u64 = 5;

/// Default minimum interval between repeated progress-message updates
/// (seconds).
pub const DEFAULT_PROGRESS_MESSAGE_INTERVAL_SECS: u64 = 2;

/// Default global job concurrency bound. 0 = unbounded.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 0;

/// Default retry attempts for read-only metadata calls.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default base delay before the first retry (milliseconds). Doubles on
/// every further attempt: 1s, 2s, 4s.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Default ring buffer capacity, in lines.
pub const DEFAULT_LOG_BUFFER_LINES: usize = 1_000;

/// Default log age threshold for cleanup (days).
pub const DEFAULT_LOG_MAX_AGE_DAYS: u32 = 30;

/// Default log directory size cap (bytes).
pub const DEFAULT_LOG_MAX_TOTAL_SIZE: u64 = 100 * 1024 * 1024;

/// Default trigger poll interval (seconds).
pub const DEFAULT_SCHEDULER_POLL_INTERVAL_SECS: u64 = 30;

/// Default stats refresh interval (seconds). 0 disables the trigger.
pub const DEFAULT_STATS_REFRESH_INTERVAL_SECS: u64 = 0;

/// Default interval between job store commits (seconds).
pub const DEFAULT_STORE_COMMIT_INTERVAL_SECS: u64 = 3;

/// Returns the engine's state directory (`~/.strongroom`).
pub fn state_dir() -> PathBuf {
    dirs_home().join(".strongroom")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_TOOL_BINARY),
            lock_wait_secs: DEFAULT_LOCK_WAIT_SECS,
        }
    }
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            termination_grace: Duration::from_secs(DEFAULT_TERMINATION_GRACE_SECS),
            progress_message_interval: Duration::from_secs(
                DEFAULT_PROGRESS_MESSAGE_INTERVAL_SECS,
            ),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: state_dir().join("logs"),
            save_policy: SavePolicy::FailedAndWarnings,
            buffer_lines: DEFAULT_LOG_BUFFER_LINES,
            max_age_days: Some(DEFAULT_LOG_MAX_AGE_DAYS),
            max_total_size: Some(DEFAULT_LOG_MAX_TOTAL_SIZE),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_SCHEDULER_POLL_INTERVAL_SECS),
            stats_refresh_interval_secs: DEFAULT_STATS_REFRESH_INTERVAL_SECS,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: state_dir().join("jobs.json"),
            commit_interval: Duration::from_secs(DEFAULT_STORE_COMMIT_INTERVAL_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert_eq!(config.tool.binary, PathBuf::from("borg"));
        assert_eq!(config.process.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(config.process.termination_grace, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.logs.buffer_lines, 1_000);
        assert_eq!(config.logs.save_policy, SavePolicy::FailedAndWarnings);
        assert_eq!(config.scheduler.stats_refresh_interval_secs, 0);
        assert_eq!(config.store.commit_interval, Duration::from_secs(3));
    }
}
