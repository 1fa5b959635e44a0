//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file. These are
//! pure data types; parsing lives in [`super::parser`] and defaults in
//! [`super::defaults`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Complete engine configuration loaded from config.ini.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// External backup tool invocation settings.
    pub tool: ToolSettings,
    /// Process supervision settings.
    pub process: ProcessSettings,
    /// Retry policy for read-only metadata calls.
    pub retry: RetrySettings,
    /// Log buffering, persistence and retention settings.
    pub logs: LogSettings,
    /// Trigger loop settings.
    pub scheduler: SchedulerSettings,
    /// Job store persistence settings.
    pub store: StoreSettings,
}

/// External tool configuration.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Path or name of the backup tool binary.
    pub binary: PathBuf,
    /// Seconds the tool waits for the repository lock before giving up.
    /// Injected as `--lock-wait` on every invocation.
    pub lock_wait_secs: u64,
}

/// Process supervision configuration.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    /// Interval between supervision heartbeats (cancellation polls).
    pub heartbeat_interval: Duration,
    /// Grace period between the terminate signal and the force kill.
    pub termination_grace: Duration,
    /// Minimum interval between applying a repeated, unchanged progress
    /// message to the job.
    pub progress_message_interval: Duration,
    /// Upper bound on simultaneously running jobs. 0 means unbounded.
    pub max_concurrent_jobs: usize,
}

/// Retry policy configuration for read-only tool calls.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Maximum attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_delay: Duration,
}

/// When to persist a finished job's output buffer to a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Only failed jobs keep logs.
    FailedOnly,
    /// Failed jobs and jobs that completed with warnings keep logs.
    FailedAndWarnings,
    /// Every job keeps logs.
    AllJobs,
}

impl FromStr for SavePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed_only" => Ok(Self::FailedOnly),
            "failed_and_warnings" => Ok(Self::FailedAndWarnings),
            "all_jobs" => Ok(Self::AllJobs),
            _ => Err(()),
        }
    }
}

/// Log buffering and retention configuration.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Directory where job log files are written.
    pub directory: PathBuf,
    /// Which terminal states get their buffer persisted.
    pub save_policy: SavePolicy,
    /// Capacity of the in-memory ring buffer, in lines.
    pub buffer_lines: usize,
    /// Age-based cleanup threshold. None disables the age pass.
    pub max_age_days: Option<u32>,
    /// Size cap for the log directory, in bytes. None disables the size pass.
    pub max_total_size: Option<u64>,
}

/// Trigger loop configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// How often the cron and interval-check triggers evaluate due work.
    pub poll_interval: Duration,
    /// Interval between stats refresh passes, in seconds. 0 disables the
    /// stats trigger. Changes are picked up without a restart.
    pub stats_refresh_interval_secs: u64,
}

/// Job store persistence configuration.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Path of the JSON job snapshot.
    pub path: PathBuf,
    /// Minimum interval between dirty-store commits.
    pub commit_interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_policy_from_str() {
        assert_eq!("failed_only".parse(), Ok(SavePolicy::FailedOnly));
        assert_eq!(
            "failed_and_warnings".parse(),
            Ok(SavePolicy::FailedAndWarnings)
        );
        assert_eq!("all_jobs".parse(), Ok(SavePolicy::AllJobs));
        assert!("everything".parse::<SavePolicy>().is_err());
    }
}
