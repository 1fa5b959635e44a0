//! Batched store commits.
//!
//! Progress parsing mutates jobs far faster than the snapshot should hit
//! disk. The [`BatchedWriter`] owns the commit cadence: mutations mark the
//! store dirty, and a background loop flushes at most once per commit
//! interval. Terminal transitions bypass the cadence with
//! [`BatchedWriter::commit_now`] so a finished job is never left uncommitted.

use super::{JobStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default interval between dirty-store commits (3 seconds).
pub const DEFAULT_COMMIT_INTERVAL_SECS: u64 = 3;

/// Timer-plus-dirty-flag buffer that owns store commit cadence.
pub struct BatchedWriter {
    store: Arc<dyn JobStore>,
    dirty: AtomicBool,
    interval: Duration,
}

impl BatchedWriter {
    /// Creates a writer for the given store.
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            store,
            dirty: AtomicBool::new(false),
            interval,
        }
    }

    /// Marks the store as having uncommitted changes.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns true if there are uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Commits immediately, regardless of the interval.
    ///
    /// Used for terminal state transitions, which must always be persisted.
    pub fn commit_now(&self) -> Result<(), StoreError> {
        self.dirty.store(false, Ordering::Release);
        self.store.flush()
    }

    /// Commits only if the store is dirty.
    fn commit_if_dirty(&self) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.store.flush() {
                // The next interval will retry; mark dirty again so the
                // change is not lost.
                warn!(error = %e, "Job store commit failed");
                self.dirty.store(true, Ordering::Release);
            }
        }
    }

    /// Runs the commit loop until shutdown, flushing one final time on exit.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        debug!(
            interval_secs = self.interval.as_secs(),
            "Batched store writer starting"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the first immediate tick.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.commit_if_dirty();
                    debug!("Batched store writer shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.commit_if_dirty();
                }
            }
        }
    }
}
