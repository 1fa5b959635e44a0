//! Interval-based integrity-check trigger.
//!
//! Repositories can carry a check cadence in days. The trigger fires when
//! `next_scheduled_check` is unset or in the past, creates a check job, and
//! advances the bookkeeping by the interval from the trigger time — before
//! the job result is known, so a failed run never blocks future scheduling.
//!
//! Anchoring at the trigger time (rather than the previously scheduled
//! time) lets the cadence drift when passes are delayed; this matches the
//! original behavior and is kept deliberately.

use crate::engine::JobEngine;
use crate::job::{JobKind, JobParams};
use crate::repo::RepositoryRegistry;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-repository interval check trigger loop.
pub struct CheckIntervalTrigger {
    registry: Arc<dyn RepositoryRegistry>,
    engine: Arc<JobEngine>,
    poll_interval: Duration,
}

impl CheckIntervalTrigger {
    /// Creates the trigger.
    pub fn new(
        registry: Arc<dyn RepositoryRegistry>,
        engine: Arc<JobEngine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            engine,
            poll_interval,
        }
    }

    /// Runs until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Check interval trigger starting"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Check interval trigger shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.fire_due(Utc::now());
                }
            }
        }
    }

    /// Creates check jobs for every repository whose check is due.
    /// Returns the number of jobs created.
    pub(crate) fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let mut created = 0;

        for repository in self.registry.all() {
            if repository.check_interval_days == 0 {
                continue;
            }
            let due = repository
                .next_scheduled_check
                .map_or(true, |next| next <= now);
            if !due {
                continue;
            }

            // Advance the cadence first, regardless of the job's outcome.
            let next = now + ChronoDuration::days(i64::from(repository.check_interval_days));
            self.registry.set_next_scheduled_check(&repository.name, next);

            match self
                .engine
                .create_job(JobKind::Check, &repository.name, JobParams::default())
            {
                Ok(handle) => {
                    debug!(
                        repository = %repository.name,
                        job_id = %handle.id(),
                        next_check = %next,
                        "Interval check job created"
                    );
                    created += 1;
                }
                Err(e) => {
                    // The cadence already advanced; the next pass is not
                    // blocked by this failure.
                    warn!(
                        repository = %repository.name,
                        error = %e,
                        "Interval check job creation failed"
                    );
                }
            }
        }

        created
    }
}
