//! Core job types: identifiers, kinds, statuses and the job record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Unique identifier for a job.
///
/// Job ids are UUID strings. They are generated once at creation time and
/// survive service restarts together with the rest of the job row.
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID from an existing string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random job ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the string value of this job ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The kind of work a job performs against a repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Create a new archive from source paths.
    Backup,
    /// Extract an archive to a target directory.
    Restore,
    /// Verify repository and archive integrity.
    Check,
    /// Compact repository storage.
    Compact,
    /// Prune archives according to a retention policy.
    Prune,
    /// Delete a single archive.
    DeleteArchive,
}

impl JobKind {
    /// Maintenance kinds take an exclusive repository lock for their whole
    /// run; at most one of them may be running per repository.
    pub fn is_maintenance(&self) -> bool {
        matches!(self, Self::Check | Self::Compact | Self::Prune)
    }

    /// Short lowercase label used in log file names and display output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Check => "check",
            Self::Compact => "compact",
            Self::Prune => "prune",
            Self::DeleteArchive => "delete-archive",
        }
    }

    /// Parses a label produced by [`JobKind::label`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "backup" => Some(Self::Backup),
            "restore" => Some(Self::Restore),
            "check" => Some(Self::Check),
            "compact" => Some(Self::Compact),
            "prune" => Some(Self::Prune),
            "delete-archive" => Some(Self::DeleteArchive),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Job execution status.
///
/// The sequence is monotonic: `Pending` → `Running` → exactly one terminal
/// state. Terminal states are never re-entered or changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet started.
    #[default]
    Pending,
    /// The external process is running.
    Running,
    /// The tool exited cleanly.
    Completed,
    /// The tool exited with warnings (exit code 1).
    CompletedWithWarnings,
    /// The tool failed, the spawn failed, or the run was orphaned.
    Failed,
    /// Cancelled by an external caller.
    Cancelled,
}

impl JobStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Failed | Self::Cancelled
        )
    }

    /// Returns true if the job finished without a hard failure.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithWarnings)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithWarnings => "completed_with_warnings",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Rejected job state transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The job is already in a terminal state.
    #[error("job is already terminal ({0})")]
    AlreadyTerminal(JobStatus),

    /// `Running` can only be entered from `Pending`.
    #[error("cannot start a job in state {0}")]
    NotPending(JobStatus),
}

/// Numeric counters reported by the tool during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Original (uncompressed, undeduplicated) bytes processed.
    pub original_bytes: u64,
    /// Compressed bytes.
    pub compressed_bytes: u64,
    /// Deduplicated bytes actually written to the repository.
    pub deduplicated_bytes: u64,
    /// Number of files processed.
    pub nfiles: u64,
}

/// OS-level identity of the spawned process.
///
/// PIDs are reused by the OS, so the PID alone cannot prove that a `running`
/// job's process is still alive after a service restart. The start-time
/// fingerprint disambiguates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// OS process id.
    pub pid: u32,
    /// Process start time in seconds since the epoch, as reported by the
    /// process table.
    pub start_fingerprint: u64,
}

/// Per-kind parameters supplied by the caller at job creation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobParams {
    /// Source paths for backup jobs.
    pub source_paths: Vec<PathBuf>,
    /// Archive name override for backup jobs, or the archive to operate on
    /// for restore/delete jobs.
    pub archive: Option<String>,
    /// Target directory for restore jobs.
    pub restore_target: Option<PathBuf>,
}

/// A persisted record tracking one external-process execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Name of the repository this job runs against.
    pub repository: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Overall progress, 0-100.
    pub progress: u8,
    pub progress_message: Option<String>,
    pub stats: JobStats,
    /// Identity of the spawned process while the job is running.
    pub process: Option<ProcessIdentity>,
    /// Path of the persisted log file, if any.
    pub log_file_path: Option<PathBuf>,
    pub has_logs: bool,
    pub error_message: Option<String>,
    /// Name of the archive a backup job created.
    pub archive_name: Option<String>,
}

impl Job {
    /// Creates a new pending job.
    pub fn new(kind: JobKind, repository: impl Into<String>) -> Self {
        Self {
            id: JobId::generate(),
            kind,
            status: JobStatus::Pending,
            repository: repository.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            progress_message: None,
            stats: JobStats::default(),
            process: None,
            log_file_path: None,
            has_logs: false,
            error_message: None,
            archive_name: None,
        }
    }

    /// Marks the job running and records the process identity.
    ///
    /// Only valid from `Pending`.
    pub fn begin(&mut self, process: ProcessIdentity) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(TransitionError::NotPending(self.status));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.process = Some(process);
        Ok(())
    }

    /// Moves the job to a terminal state, exactly once.
    ///
    /// A terminal job rejects any further transition, so the status sequence
    /// stays monotonic even if two completion paths race.
    pub fn finish(
        &mut self,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<(), TransitionError> {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.status));
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        if error_message.is_some() {
            self.error_message = error_message;
        }
        Ok(())
    }

    /// Records completion details on a job that an external caller already
    /// marked cancelled.
    ///
    /// The status itself is untouched; only the timestamp and the
    /// cancellation reason are filled in by the supervisor once the process
    /// is actually gone.
    pub fn record_cancellation(&mut self, reason: impl Into<String>) {
        debug_assert_eq!(self.status, JobStatus::Cancelled);
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        if self.error_message.is_none() {
            self.error_message = Some(reason.into());
        }
    }

    /// Wall-clock duration from start to completion, when both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_maintenance() {
        assert!(JobKind::Check.is_maintenance());
        assert!(JobKind::Compact.is_maintenance());
        assert!(JobKind::Prune.is_maintenance());
        assert!(!JobKind::Backup.is_maintenance());
        assert!(!JobKind::Restore.is_maintenance());
        assert!(!JobKind::DeleteArchive.is_maintenance());
    }

    #[test]
    fn job_kind_label_round_trip() {
        for kind in [
            JobKind::Backup,
            JobKind::Restore,
            JobKind::Check,
            JobKind::Compact,
            JobKind::Prune,
            JobKind::DeleteArchive,
        ] {
            assert_eq!(JobKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(JobKind::from_label("bogus"), None);
    }

    #[test]
    fn status_terminal_classification() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::CompletedWithWarnings.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn begin_requires_pending() {
        let mut job = Job::new(JobKind::Backup, "main");
        let identity = ProcessIdentity {
            pid: 1234,
            start_fingerprint: 99,
        };

        assert!(job.begin(identity).is_ok());
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert_eq!(job.process, Some(identity));

        // A second begin is rejected.
        assert_eq!(
            job.begin(identity),
            Err(TransitionError::NotPending(JobStatus::Running))
        );
    }

    #[test]
    fn finish_is_exactly_once() {
        let mut job = Job::new(JobKind::Check, "main");
        job.begin(ProcessIdentity {
            pid: 1,
            start_fingerprint: 1,
        })
        .unwrap();

        job.finish(JobStatus::Completed, None).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());

        // Terminal states are immutable.
        let err = job.finish(JobStatus::Failed, Some("late failure".into()));
        assert_eq!(
            err,
            Err(TransitionError::AlreadyTerminal(JobStatus::Completed))
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn pending_job_can_fail_directly() {
        // Pre-flight failures terminate a job that never started.
        let mut job = Job::new(JobKind::Backup, "main");
        job.finish(JobStatus::Failed, Some("unknown repository".into()))
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("unknown repository"));
    }

    #[test]
    fn record_cancellation_fills_reason_once() {
        let mut job = Job::new(JobKind::Backup, "main");
        job.begin(ProcessIdentity {
            pid: 1,
            start_fingerprint: 1,
        })
        .unwrap();
        job.finish(JobStatus::Cancelled, None).unwrap();

        job.record_cancellation("terminated after cancellation request");
        assert!(job.completed_at.is_some());
        assert_eq!(
            job.error_message.as_deref(),
            Some("terminated after cancellation request")
        );

        // A second call never overwrites the recorded reason.
        job.record_cancellation("process already gone");
        assert_eq!(
            job.error_message.as_deref(),
            Some("terminated after cancellation request")
        );
    }

    #[test]
    fn duration_requires_both_timestamps() {
        let mut job = Job::new(JobKind::Prune, "main");
        assert!(job.duration().is_none());
        job.begin(ProcessIdentity {
            pid: 1,
            start_fingerprint: 1,
        })
        .unwrap();
        assert!(job.duration().is_none());
        job.finish(JobStatus::Completed, None).unwrap();
        assert!(job.duration().is_some());
    }
}
