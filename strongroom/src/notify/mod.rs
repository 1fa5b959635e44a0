//! Terminal-state notifications.
//!
//! The engine emits one structured payload per job that reaches a terminal
//! state; a [`Notifier`] collaborator decides how to present it. This
//! follows the emit-don't-present pattern: the engine knows nothing about
//! delivery channels.

use crate::job::{Job, JobKind, JobStatus};
use std::time::Duration;

/// Structured payload describing a finished job.
#[derive(Clone, Debug)]
pub struct JobNotification {
    /// Job id as a string.
    pub job_id: String,
    /// Repository the job ran against.
    pub repository: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Wall-clock run time, when both timestamps are known.
    pub duration: Option<Duration>,
    /// Error or cancellation text, if any.
    pub error: Option<String>,
}

impl JobNotification {
    /// Builds the payload from a terminal job row.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            repository: job.repository.clone(),
            kind: job.kind,
            status: job.status,
            duration: job.duration().and_then(|d| d.to_std().ok()),
            error: job.error_message.clone(),
        }
    }
}

/// Notification dispatcher, invoked once per terminal state.
pub trait Notifier: Send + Sync {
    /// Delivers a terminal-state notification.
    ///
    /// Implementations must not block the caller for long and must not
    /// panic; a lost notification never fails a job.
    fn notify(&self, notification: JobNotification);
}

/// Notifier that discards everything.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: JobNotification) {}
}

/// Derived repository metadata republished by the stats trigger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Original size of all archives, in bytes.
    pub total_size: u64,
    /// Compressed size of all archives, in bytes.
    pub total_csize: u64,
    /// Deduplicated size actually stored, in bytes.
    pub unique_csize: u64,
    /// Number of archives in the repository.
    pub archive_count: u64,
}

/// Telemetry collaborator for the periodic stats refresh.
pub trait StatsPublisher: Send + Sync {
    /// Publishes a repository's refreshed stats.
    fn publish(&self, repository: &str, stats: RepositoryStats);
}

/// Publisher that discards everything.
pub struct NullStatsPublisher;

impl StatsPublisher for NullStatsPublisher {
    fn publish(&self, _repository: &str, _stats: RepositoryStats) {}
}

/// Publisher that logs through `tracing`.
pub struct TracingStatsPublisher;

impl StatsPublisher for TracingStatsPublisher {
    fn publish(&self, repository: &str, stats: RepositoryStats) {
        tracing::info!(
            repository,
            total_size = stats.total_size,
            unique_csize = stats.unique_csize,
            archives = stats.archive_count,
            "Repository stats refreshed"
        );
    }
}

/// Notifier that logs payloads through `tracing`.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: JobNotification) {
        if n.status.is_success() {
            tracing::info!(
                job_id = %n.job_id,
                repository = %n.repository,
                kind = %n.kind,
                status = %n.status,
                duration_secs = n.duration.map(|d| d.as_secs()),
                "Job finished"
            );
        } else {
            tracing::warn!(
                job_id = %n.job_id,
                repository = %n.repository,
                kind = %n.kind,
                status = %n.status,
                error = n.error.as_deref().unwrap_or(""),
                "Job finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, ProcessIdentity};

    #[test]
    fn payload_is_built_from_job_row() {
        let mut job = Job::new(JobKind::Backup, "offsite");
        job.begin(ProcessIdentity {
            pid: 7,
            start_fingerprint: 7,
        })
        .unwrap();
        job.finish(JobStatus::Failed, Some("exit code 2".into()))
            .unwrap();

        let n = JobNotification::from_job(&job);
        assert_eq!(n.repository, "offsite");
        assert_eq!(n.kind, JobKind::Backup);
        assert_eq!(n.status, JobStatus::Failed);
        assert_eq!(n.error.as_deref(), Some("exit code 2"));
        assert!(n.duration.is_some());
    }
}
