//! In-memory job store.

use super::{JobStore, StoreError};
use crate::job::{Job, JobId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Job store backed by a plain in-memory map.
///
/// This is the store the engine mutates on every progress event; the
/// file-backed store wraps it and adds snapshot persistence.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with jobs (used when loading a
    /// snapshot from disk).
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let map = jobs.into_iter().map(|job| (job.id.clone(), job)).collect();
        Self {
            jobs: RwLock::new(map),
        }
    }
}

impl JobStore for MemoryStore {
    fn insert_guarded(&self, job: Job, guard: &dyn Fn(&Job) -> bool) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        if let Some(conflicting) = jobs.values().find(|existing| guard(existing)) {
            return Err(StoreError::Conflict {
                conflicting: conflicting.id.clone(),
            });
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    fn update(&self, id: &JobId, mutate: &mut dyn FnMut(&mut Job)) -> Option<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id)?;
        mutate(job);
        Some(job.clone())
    }

    fn all(&self) -> Vec<Job> {
        self.jobs.read().values().cloned().collect()
    }
}
