//! JSON-file-backed job store.
//!
//! Jobs live in memory; [`JsonFileStore::flush`] snapshots them to a single
//! JSON file, written to a temporary sibling and renamed into place so a
//! crash mid-write never truncates the previous snapshot. The flush cadence
//! is owned by [`super::BatchedWriter`], not by callers of `update`.

use super::{JobStore, MemoryStore, StoreError};
use crate::job::{Job, JobId};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Job store persisted as a JSON snapshot on disk.
pub struct JsonFileStore {
    inner: MemoryStore,
    path: PathBuf,
}

impl JsonFileStore {
    /// Opens the store, loading an existing snapshot if one is present.
    ///
    /// A missing file yields an empty store. A corrupt snapshot is renamed
    /// aside (`.corrupt`) and logged rather than taking the service down;
    /// losing job history is recoverable, refusing to start is not.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let jobs = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<Job>>(&bytes) {
                Ok(jobs) => jobs,
                Err(e) => {
                    let aside = path.with_extension("corrupt");
                    warn!(
                        path = %path.display(),
                        error = %e,
                        moved_to = %aside.display(),
                        "Job store snapshot is corrupt, starting empty"
                    );
                    let _ = fs::rename(&path, &aside);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::Persist(e)),
        };

        debug!(path = %path.display(), jobs = jobs.len(), "Job store opened");
        Ok(Self {
            inner: MemoryStore::with_jobs(jobs),
            path,
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobStore for JsonFileStore {
    fn insert_guarded(&self, job: Job, guard: &dyn Fn(&Job) -> bool) -> Result<(), StoreError> {
        self.inner.insert_guarded(job, guard)
    }

    fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.get(id)
    }

    fn update(&self, id: &JobId, mutate: &mut dyn FnMut(&mut Job)) -> Option<Job> {
        self.inner.update(id, mutate)
    }

    fn all(&self) -> Vec<Job> {
        self.inner.all()
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut jobs = self.all();
        // Stable order keeps snapshots diffable.
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let encoded = serde_json::to_vec_pretty(&jobs)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
