//! Orphan reconciliation.
//!
//! Run once at service startup: every job the store still believes is
//! `running` is checked against the live process table. A matching
//! (PID, start-time) fingerprint means the process survived the restart and
//! supervision can be resumed; anything else means the job was orphaned and
//! is failed with an explicit reason.

use super::identity::identity_matches;
use crate::job::{Job, JobId, JobStatus};
use crate::store::{JobStore, JobStoreExt};
use std::sync::Arc;
use tracing::{info, warn};

/// Reason text recorded on jobs orphaned by a restart.
pub const ORPHANED_REASON: &str = "orphaned by service restart: process no longer running";

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Jobs whose process was re-verified; supervision should resume.
    pub adopted: Vec<JobId>,
    /// Jobs marked failed because their process is gone or unverifiable.
    pub orphaned: Vec<JobId>,
}

/// Reconciles `running` jobs against the live process table.
pub struct OrphanTracker {
    store: Arc<dyn JobStore>,
}

impl OrphanTracker {
    /// Creates a tracker over the store.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Runs the startup reconciliation pass.
    ///
    /// Jobs with a live, matching fingerprint are left `running` and
    /// reported for adoption. Jobs with no process identity, a dead PID or
    /// a mismatched fingerprint are failed with [`ORPHANED_REASON`] and
    /// their process identity is cleared.
    pub fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for job in self.store.running() {
            if self.is_still_alive(&job) {
                info!(
                    job_id = %job.id,
                    pid = job.process.map(|p| p.pid),
                    "Running job's process verified, resuming supervision"
                );
                report.adopted.push(job.id);
            } else {
                warn!(
                    job_id = %job.id,
                    pid = job.process.map(|p| p.pid),
                    "Running job's process is gone, marking orphaned"
                );
                self.store.update(&job.id, &mut |job| {
                    // `finish` refuses a second terminal transition, which
                    // is exactly what we want if a racing path got there
                    // first.
                    let _ = job.finish(JobStatus::Failed, Some(ORPHANED_REASON.to_string()));
                    job.process = None;
                });
                report.orphaned.push(job.id);
            }
        }

        if !report.adopted.is_empty() || !report.orphaned.is_empty() {
            info!(
                adopted = report.adopted.len(),
                orphaned = report.orphaned.len(),
                "Orphan reconciliation complete"
            );
        }
        report
    }

    fn is_still_alive(&self, job: &Job) -> bool {
        match &job.process {
            Some(identity) => identity_matches(identity),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, ProcessIdentity};
    use crate::process::identity::capture_identity;
    use crate::store::MemoryStore;

    fn store_with(job: Job) -> (Arc<MemoryStore>, JobId) {
        let store = Arc::new(MemoryStore::new());
        let id = job.id.clone();
        store.insert(job).unwrap();
        (store, id)
    }

    fn running_job_with_identity(identity: Option<ProcessIdentity>) -> Job {
        let mut job = Job::new(JobKind::Backup, "main");
        job.status = JobStatus::Running;
        job.process = identity;
        job
    }

    #[test]
    fn live_matching_process_is_adopted() {
        // Use our own process as the "still running" tool.
        let identity = capture_identity(std::process::id());
        let (store, id) = store_with(running_job_with_identity(Some(identity)));

        let tracker = OrphanTracker::new(store.clone() as Arc<dyn JobStore>);
        let report = tracker.reconcile();

        assert_eq!(report.adopted, vec![id.clone()]);
        assert!(report.orphaned.is_empty());
        // Never marked orphaned.
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn dead_pid_is_orphaned() {
        let identity = ProcessIdentity {
            pid: u32::MAX - 3,
            start_fingerprint: 777,
        };
        let (store, id) = store_with(running_job_with_identity(Some(identity)));

        let tracker = OrphanTracker::new(store.clone() as Arc<dyn JobStore>);
        let report = tracker.reconcile();

        assert_eq!(report.orphaned, vec![id.clone()]);
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(ORPHANED_REASON));
        assert!(job.process.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn reused_pid_with_wrong_fingerprint_is_orphaned() {
        // Live PID, but a fingerprint from a previous boot.
        let mut identity = capture_identity(std::process::id());
        identity.start_fingerprint = identity.start_fingerprint.wrapping_sub(100);
        let (store, id) = store_with(running_job_with_identity(Some(identity)));

        let tracker = OrphanTracker::new(store.clone() as Arc<dyn JobStore>);
        let report = tracker.reconcile();

        assert_eq!(report.orphaned, vec![id]);
    }

    #[test]
    fn missing_identity_is_orphaned() {
        let (store, id) = store_with(running_job_with_identity(None));

        let tracker = OrphanTracker::new(store.clone() as Arc<dyn JobStore>);
        let report = tracker.reconcile();

        assert_eq!(report.orphaned, vec![id]);
    }

    #[test]
    fn non_running_jobs_are_untouched() {
        let store = Arc::new(MemoryStore::new());
        let pending = Job::new(JobKind::Check, "main");
        let pending_id = pending.id.clone();
        store.insert(pending).unwrap();

        let mut failed = Job::new(JobKind::Prune, "main");
        failed
            .finish(JobStatus::Failed, Some("tool error".into()))
            .unwrap();
        let failed_id = failed.id.clone();
        store.insert(failed).unwrap();

        let tracker = OrphanTracker::new(store.clone() as Arc<dyn JobStore>);
        let report = tracker.reconcile();

        assert_eq!(report, ReconcileReport::default());
        assert_eq!(store.get(&pending_id).unwrap().status, JobStatus::Pending);
        assert_eq!(
            store.get(&failed_id).unwrap().error_message.as_deref(),
            Some("tool error")
        );
    }
}
