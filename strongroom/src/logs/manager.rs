//! Log persistence and retention orchestration.

use super::buffer::{LogBuffer, LogChunk};
use super::cleanup::{cleanup_log_dir, CleanupResult};
use super::stats::{scan_log_dir, LogDirStats};
use crate::config::{LogSettings, SavePolicy};
use crate::job::{Job, JobStatus};
use crate::store::{JobStore, JobStoreExt};
use chrono::Utc;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Owns the log directory: persistence on terminal state, accounting, and
/// retention.
pub struct LogManager {
    settings: LogSettings,
}

impl LogManager {
    /// Creates a manager over the configured log directory.
    pub fn new(settings: LogSettings) -> Self {
        Self { settings }
    }

    /// Directory the manager writes to.
    pub fn directory(&self) -> &Path {
        &self.settings.directory
    }

    /// Ring buffer capacity for new jobs.
    pub fn buffer_capacity(&self) -> usize {
        self.settings.buffer_lines
    }

    /// Creates the ring buffer for one job's run.
    pub fn new_buffer(&self) -> LogBuffer {
        LogBuffer::new(self.settings.buffer_lines)
    }

    /// Whether a job's terminal status qualifies for persistence under the
    /// configured save policy.
    pub fn should_persist(&self, status: JobStatus) -> bool {
        match self.settings.save_policy {
            SavePolicy::FailedOnly => matches!(status, JobStatus::Failed | JobStatus::Cancelled),
            SavePolicy::FailedAndWarnings => matches!(
                status,
                JobStatus::Failed | JobStatus::Cancelled | JobStatus::CompletedWithWarnings
            ),
            SavePolicy::AllJobs => status.is_terminal(),
        }
    }

    /// Persists a finished job's buffer if the save policy says so.
    ///
    /// Returns the path of the written file, or `None` when the policy
    /// skipped persistence. The file name is deterministic:
    /// `{kind}-{job_id}-{timestamp}.log`.
    pub fn persist(&self, job: &Job, buffer: &LogBuffer) -> io::Result<Option<PathBuf>> {
        if !self.should_persist(job.status) {
            debug!(job_id = %job.id, status = %job.status, "Save policy skips log persistence");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.settings.directory)?;
        let timestamp = job
            .completed_at
            .unwrap_or_else(Utc::now)
            .format("%Y%m%dT%H%M%S");
        let name = format!("{}-{}-{}.log", job.kind.label(), job.id, timestamp);
        let path = self.settings.directory.join(name);

        let mut contents = buffer.snapshot().join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        std::fs::write(&path, contents)?;

        info!(job_id = %job.id, path = %path.display(), lines = buffer.len(), "Job log persisted");
        Ok(Some(path))
    }

    /// Reads lines from a persisted log file starting at `offset`.
    pub fn read_persisted(&self, path: &Path, offset: u64) -> io::Result<LogChunk> {
        let contents = std::fs::read_to_string(path)?;
        let all: Vec<&str> = contents.lines().collect();
        let total = all.len() as u64;
        let from = offset.min(total);
        let lines = all[from as usize..]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Ok(LogChunk {
            start: from,
            lines,
            next_offset: total,
        })
    }

    /// Computes directory accounting: totals, mtime range, per-kind split.
    pub fn stats(&self) -> io::Result<LogDirStats> {
        scan_log_dir(&self.settings.directory)
    }

    /// Runs retention over the log directory.
    ///
    /// The protected set is recomputed from the store's running jobs on
    /// every invocation — never cached — so a job that started since the
    /// last cleanup is covered and one that finished is not.
    pub fn cleanup(&self, store: &dyn JobStore) -> io::Result<CleanupResult> {
        let protected: HashSet<PathBuf> = store
            .running()
            .into_iter()
            .filter_map(|job| job.log_file_path)
            .collect();

        cleanup_log_dir(
            &self.settings.directory,
            self.settings.max_age_days,
            self.settings.max_total_size,
            &protected,
            SystemTime::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, ProcessIdentity};
    use crate::store::{JobStoreExt, MemoryStore};
    use tempfile::TempDir;

    fn settings(dir: &Path, policy: SavePolicy) -> LogSettings {
        LogSettings {
            directory: dir.to_path_buf(),
            save_policy: policy,
            buffer_lines: 100,
            max_age_days: None,
            max_total_size: Some(150),
        }
    }

    fn finished_job(status: JobStatus) -> Job {
        let mut job = Job::new(JobKind::Backup, "main");
        job.begin(ProcessIdentity {
            pid: 1,
            start_fingerprint: 1,
        })
        .unwrap();
        job.finish(status, None).unwrap();
        job
    }

    #[test]
    fn save_policy_gates_persistence() {
        let dir = TempDir::new().unwrap();

        let failed_only = LogManager::new(settings(dir.path(), SavePolicy::FailedOnly));
        assert!(failed_only.should_persist(JobStatus::Failed));
        assert!(failed_only.should_persist(JobStatus::Cancelled));
        assert!(!failed_only.should_persist(JobStatus::CompletedWithWarnings));
        assert!(!failed_only.should_persist(JobStatus::Completed));

        let warnings = LogManager::new(settings(dir.path(), SavePolicy::FailedAndWarnings));
        assert!(warnings.should_persist(JobStatus::CompletedWithWarnings));
        assert!(!warnings.should_persist(JobStatus::Completed));

        let all = LogManager::new(settings(dir.path(), SavePolicy::AllJobs));
        assert!(all.should_persist(JobStatus::Completed));
    }

    #[test]
    fn persist_writes_deterministic_name() {
        let dir = TempDir::new().unwrap();
        let manager = LogManager::new(settings(dir.path(), SavePolicy::AllJobs));

        let job = finished_job(JobStatus::Completed);
        let buffer = manager.new_buffer();
        buffer.push("line one");
        buffer.push("line two");

        let path = manager.persist(&job, &buffer).unwrap().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("backup-{}-", job.id)));
        assert!(name.ends_with(".log"));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "line one\nline two\n");
    }

    #[test]
    fn persist_respects_policy() {
        let dir = TempDir::new().unwrap();
        let manager = LogManager::new(settings(dir.path(), SavePolicy::FailedOnly));

        let job = finished_job(JobStatus::Completed);
        let buffer = manager.new_buffer();
        buffer.push("output");

        assert!(manager.persist(&job, &buffer).unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn read_persisted_honors_offset() {
        let dir = TempDir::new().unwrap();
        let manager = LogManager::new(settings(dir.path(), SavePolicy::AllJobs));

        let job = finished_job(JobStatus::Completed);
        let buffer = manager.new_buffer();
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        let path = manager.persist(&job, &buffer).unwrap().unwrap();

        let chunk = manager.read_persisted(&path, 3).unwrap();
        assert_eq!(chunk.lines, vec!["line 3", "line 4"]);
        assert_eq!(chunk.next_offset, 5);

        let past_end = manager.read_persisted(&path, 99).unwrap();
        assert!(past_end.lines.is_empty());
    }

    #[test]
    fn cleanup_protects_running_jobs_logs() {
        let dir = TempDir::new().unwrap();
        let manager = LogManager::new(settings(dir.path(), SavePolicy::AllJobs));

        // A running job whose log path is already on disk.
        let live_path = dir.path().join("backup-live-20260101T000000.log");
        std::fs::write(&live_path, vec![b'x'; 100]).unwrap();
        let mut running = Job::new(JobKind::Backup, "main");
        running.status = JobStatus::Running;
        running.log_file_path = Some(live_path.clone());

        let stale_path = dir.path().join("backup-stale-20260101T000000.log");
        std::fs::write(&stale_path, vec![b'x'; 100]).unwrap();

        let store = MemoryStore::new();
        store.insert(running).unwrap();

        // Cap of 150 forces the size pass to delete one file; it must be
        // the unprotected one even though both are equally old.
        let result = manager.cleanup(&store).unwrap();
        assert!(live_path.exists());
        assert!(!stale_path.exists());
        assert!(result.protected_skipped >= 1 || result.deleted_by_size == 1);
    }
}
