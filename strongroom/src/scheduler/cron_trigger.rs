//! Cron trigger loop.
//!
//! Evaluates enabled schedule definitions on a poll interval. A due
//! definition creates one job per linked repository; `next_run` is then
//! recomputed from the cron expression relative to the actual fire time.

use super::definition::ScheduleSet;
use crate::engine::JobEngine;
use crate::job::{JobKind, JobParams, JobStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cron-based trigger loop.
pub struct CronTrigger {
    schedules: ScheduleSet,
    engine: Arc<JobEngine>,
    poll_interval: Duration,
}

impl CronTrigger {
    /// Creates the trigger over a schedule set.
    pub fn new(schedules: ScheduleSet, engine: Arc<JobEngine>, poll_interval: Duration) -> Self {
        Self {
            schedules,
            engine,
            poll_interval,
        }
    }

    /// Runs until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Cron trigger starting"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Cron trigger shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.fire_due(Utc::now());
                }
            }
        }
    }

    /// Fires every due schedule. Returns the number of jobs created.
    pub(crate) fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let mut created = 0;

        for definition in self.schedules.due(now) {
            debug!(schedule = %definition.id, "Schedule due");

            let params = JobParams {
                source_paths: if definition.kind == JobKind::Backup {
                    definition.source_paths.clone()
                } else {
                    Vec::new()
                },
                ..Default::default()
            };

            // One job per linked repository; one repository's failure must
            // not abort the rest of the batch.
            for repository in &definition.repositories {
                match self
                    .engine
                    .create_job(definition.kind, repository, params.clone())
                {
                    Ok(handle) => {
                        created += 1;
                        if let Some(max_duration) = definition.max_duration {
                            self.enforce_max_duration(handle.id().clone(), max_duration);
                        }
                    }
                    Err(e) => {
                        warn!(
                            schedule = %definition.id,
                            repository = %repository,
                            error = %e,
                            "Scheduled job creation failed"
                        );
                    }
                }
            }

            // Recompute from the actual fire time, not the planned one.
            match definition.compute_next_run(now) {
                Ok(next_run) => self.schedules.record_fire(&definition.id, now, next_run),
                Err(e) => {
                    // A definition that cannot produce a next fire would be
                    // due again on every pass; disable it instead.
                    warn!(schedule = %definition.id, error = %e, "Disabling broken schedule");
                    self.schedules.record_fire(&definition.id, now, None);
                    self.schedules.set_enabled(&definition.id, false);
                }
            }
        }

        created
    }

    /// Cancels a scheduled job that outlives its per-schedule budget.
    fn enforce_max_duration(&self, job_id: crate::job::JobId, max_duration: Duration) {
        let engine = Arc::clone(&self.engine);
        self.engine.track(async move {
            tokio::time::sleep(max_duration).await;
            let still_running = engine
                .status(&job_id)
                .map(|job| job.status == JobStatus::Running || job.status == JobStatus::Pending)
                .unwrap_or(false);
            if still_running {
                warn!(job_id = %job_id, "Scheduled job exceeded its max duration, cancelling");
                engine.cancel(&job_id);
            }
        });
    }
}
