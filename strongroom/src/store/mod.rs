//! Job persistence.
//!
//! The [`JobStore`] trait is the seam between the engine and whatever holds
//! job rows. Two implementations are provided: a plain in-memory map and a
//! JSON-file-backed store that snapshots the map to disk. Commit cadence for
//! the file store is owned by the [`BatchedWriter`], which decouples how
//! often progress parsing mutates a job from how often the snapshot hits
//! disk.

mod file;
mod memory;
mod writer;

use crate::job::{Job, JobId, JobStatus};
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use writer::{BatchedWriter, DEFAULT_COMMIT_INTERVAL_SECS};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A job with this id already exists.
    #[error("job {0} already exists")]
    Duplicate(JobId),

    /// The insert guard rejected the new job.
    #[error("conflicting job {conflicting} is still running")]
    Conflict {
        /// Id of the job that caused the rejection.
        conflicting: JobId,
    },

    /// Snapshot persistence failed.
    #[error("failed to persist job store: {0}")]
    Persist(#[from] std::io::Error),

    /// Snapshot (de)serialization failed.
    #[error("failed to encode job store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Storage abstraction for job rows.
///
/// All mutation goes through [`JobStore::update`], which runs the closure
/// under the store's lock so read-modify-write cycles on a single job are
/// atomic. The insert guard in [`JobStore::insert_guarded`] runs under the
/// same lock, which is what makes the one-maintenance-job-per-repository
/// precondition a real invariant rather than a best-effort check.
pub trait JobStore: Send + Sync {
    /// Inserts a new job after checking every existing row against `guard`.
    ///
    /// If `guard` returns true for any existing job, the insert is rejected
    /// with [`StoreError::Conflict`] naming that job. The check and the
    /// insert happen atomically.
    fn insert_guarded(&self, job: Job, guard: &dyn Fn(&Job) -> bool) -> Result<(), StoreError>;

    /// Returns a snapshot of the job with the given id.
    fn get(&self, id: &JobId) -> Option<Job>;

    /// Mutates a job under the store lock. Returns the updated snapshot, or
    /// `None` if the job does not exist.
    fn update(&self, id: &JobId, mutate: &mut dyn FnMut(&mut Job)) -> Option<Job>;

    /// Returns snapshots of all jobs.
    fn all(&self) -> Vec<Job>;

    /// Writes the current state to the backing medium, if there is one.
    ///
    /// The in-memory store treats this as a no-op.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Convenience queries shared by all store implementations.
pub trait JobStoreExt: JobStore {
    /// Inserts a job with no conflict guard.
    fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.insert_guarded(job, &|_| false)
    }

    /// Returns all jobs currently in the `Running` state.
    fn running(&self) -> Vec<Job> {
        self.all()
            .into_iter()
            .filter(|job| job.status == JobStatus::Running)
            .collect()
    }

    /// Marks a non-terminal job cancelled.
    ///
    /// Returns true if the job existed and was not yet terminal. The actual
    /// process termination is performed by the supervision heartbeat, which
    /// observes the status change on its next tick.
    fn request_cancel(&self, id: &JobId) -> bool {
        let mut cancelled = false;
        self.update(id, &mut |job| {
            if !job.status.is_terminal() {
                job.status = JobStatus::Cancelled;
                cancelled = true;
            }
        });
        cancelled
    }
}

impl<S: JobStore + ?Sized> JobStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;

    #[test]
    fn request_cancel_only_non_terminal() {
        let store = MemoryStore::new();
        let job = Job::new(JobKind::Backup, "main");
        let id = job.id.clone();
        store.insert(job).unwrap();

        assert!(store.request_cancel(&id));
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Cancelled);

        // Already terminal: a second cancel is a no-op.
        assert!(!store.request_cancel(&id));
        assert!(!store.request_cancel(&JobId::new("missing")));
    }

    #[test]
    fn running_filters_by_status() {
        let store = MemoryStore::new();
        let mut a = Job::new(JobKind::Backup, "main");
        a.status = JobStatus::Running;
        let b = Job::new(JobKind::Check, "main");
        store.insert(a.clone()).unwrap();
        store.insert(b).unwrap();

        let running = store.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a.id);
    }
}
