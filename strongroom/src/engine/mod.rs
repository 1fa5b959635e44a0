//! The job execution engine.
//!
//! [`JobEngine`] is the single entry point collaborators use: triggers and
//! external callers create jobs through it, presentation layers read job
//! state through it, and shutdown drains it. It is constructed once at
//! startup with its dependencies injected; there is no global instance.

mod command;
mod error;
mod execution;

pub use error::EngineError;

use crate::config::Config;
use crate::job::{Job, JobId, JobKind, JobParams, JobStatus};
use crate::logs::{CleanupResult, LogChunk, LogDirStats, LogManager};
use crate::notify::{JobNotification, Notifier, RepositoryStats};
use crate::process::{watch_adopted, OrphanTracker, ProcessRunner, ReconcileReport, SupervisionOutcome};
use crate::repo::RepositoryRegistry;
use crate::retry::{RetryPolicy, ToolError};
use crate::secrets::SecretStore;
use crate::store::{BatchedWriter, JobStore, JobStoreExt, StoreError};
use execution::EngineShared;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Reason recorded when an adopted process exits: the service is not the
/// parent, so the exit code cannot be observed.
pub const ADOPTED_EXIT_UNOBSERVABLE: &str =
    "process exited after a service restart; exit status unobservable";

/// Handle returned from job creation.
///
/// Cloneable; all clones observe the same job.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    store: Arc<dyn JobStore>,
    done: watch::Receiver<bool>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl JobHandle {
    /// The job's id.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Current job snapshot.
    pub fn job(&self) -> Option<Job> {
        self.store.get(&self.id)
    }

    /// Current status.
    pub fn status(&self) -> Option<JobStatus> {
        self.job().map(|job| job.status)
    }

    /// Waits until the execution task finished and returns the final row.
    pub async fn wait(&mut self) -> Option<Job> {
        while !*self.done.borrow() {
            if self.done.changed().await.is_err() {
                break;
            }
        }
        self.job()
    }
}

/// The job execution and orchestration engine.
pub struct JobEngine {
    shared: Arc<EngineShared>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl JobEngine {
    /// Wires the engine from configuration and its collaborators.
    pub fn new(
        config: &Config,
        store: Arc<dyn JobStore>,
        registry: Arc<dyn RepositoryRegistry>,
        secrets: Arc<dyn SecretStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let writer = Arc::new(BatchedWriter::new(
            Arc::clone(&store),
            config.store.commit_interval,
        ));
        let job_semaphore = match config.process.max_concurrent_jobs {
            0 => None,
            bound => Some(Arc::new(Semaphore::new(bound))),
        };

        let shared = Arc::new(EngineShared {
            store,
            writer,
            registry,
            secrets,
            notifier,
            log_manager: Arc::new(LogManager::new(config.logs.clone())),
            runner: ProcessRunner,
            tool: config.tool.clone(),
            process: config.process.clone(),
            retry: RetryPolicy::new(config.retry.max_attempts, config.retry.base_delay),
            live_logs: Mutex::new(HashMap::new()),
            job_semaphore,
        });

        Self {
            shared,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Starts background machinery and reconciles state left by a previous
    /// run: the batched store writer, orphan reconciliation (with adoption
    /// of surviving processes), and the startup log cleanup.
    pub fn start(&self) -> ReconcileReport {
        self.tasks.spawn(
            Arc::clone(&self.shared.writer).run(self.shutdown.clone()),
        );

        let report = OrphanTracker::new(Arc::clone(&self.shared.store)).reconcile();
        for job_id in &report.adopted {
            self.resume_supervision(job_id.clone());
        }
        for job_id in &report.orphaned {
            if let Some(job) = self.shared.store.get(job_id) {
                self.shared.notifier.notify(JobNotification::from_job(&job));
            }
        }
        if !report.orphaned.is_empty() {
            if let Err(e) = self.shared.writer.commit_now() {
                warn!(error = %e, "Commit after orphan reconciliation failed");
            }
        }

        match self.shared.log_manager.cleanup(self.shared.store.as_ref()) {
            Ok(result) => {
                if result.deleted_by_age + result.deleted_by_size > 0 {
                    info!(
                        deleted = result.deleted_by_age + result.deleted_by_size,
                        bytes_freed = result.bytes_freed,
                        "Startup log cleanup"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Startup log cleanup failed"),
        }

        report
    }

    /// Creates a job and spawns its execution task.
    ///
    /// Pre-flight: the repository must exist, and at most one maintenance
    /// job (check/compact/prune) may be running per repository — checked
    /// atomically inside the store insert and surfaced as a conflict.
    pub fn create_job(
        &self,
        kind: JobKind,
        repository: &str,
        params: JobParams,
    ) -> Result<JobHandle, EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        let repo = self
            .shared
            .registry
            .get(repository)
            .ok_or_else(|| EngineError::UnknownRepository(repository.to_string()))?;

        let job = Job::new(kind, &repo.name);
        let id = job.id.clone();
        let repo_name = repo.name.clone();
        self.shared
            .store
            .insert_guarded(job, &|existing| {
                kind.is_maintenance()
                    && existing.repository == repo_name
                    && existing.status == JobStatus::Running
                    && existing.kind.is_maintenance()
            })
            .map_err(|e| match e {
                StoreError::Conflict { conflicting } => EngineError::MaintenanceConflict {
                    repository: repo_name.clone(),
                    kind,
                    conflicting,
                },
                other => EngineError::Store(other),
            })?;
        self.shared.writer.mark_dirty();
        info!(job_id = %id, kind = %kind, repository = %repo_name, "Job created");

        let (done_tx, done_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let token = self.shutdown.clone();
        let task_id = id.clone();
        self.tasks.spawn(async move {
            let execution = tokio::spawn(execution::run_job(
                Arc::clone(&shared),
                task_id.clone(),
                params,
                token,
            ));
            if execution.await.is_err() {
                // The execution task died (a panic): fail the job at the
                // boundary rather than leaving it running forever.
                shared.store.update(&task_id, &mut |job| {
                    if !job.status.is_terminal() {
                        let _ = job.finish(
                            JobStatus::Failed,
                            Some("internal error during job execution".to_string()),
                        );
                    }
                });
                let _ = shared.writer.commit_now();
            }
            let _ = done_tx.send(true);
        });

        Ok(JobHandle {
            id,
            store: Arc::clone(&self.shared.store),
            done: done_rx,
        })
    }

    /// Returns a snapshot of a job.
    pub fn status(&self, id: &JobId) -> Option<Job> {
        self.shared.store.get(id)
    }

    /// Returns snapshots of all jobs.
    pub fn jobs(&self) -> Vec<Job> {
        self.shared.store.all()
    }

    /// Requests cancellation of a job.
    ///
    /// Returns true if the job existed and was not yet terminal. The
    /// supervision heartbeat performs the actual termination within
    /// heartbeat_interval + termination_grace.
    pub fn cancel(&self, id: &JobId) -> bool {
        let cancelled = self.shared.store.request_cancel(id);
        if cancelled {
            self.shared.writer.mark_dirty();
            info!(job_id = %id, "Cancellation requested");
        }
        cancelled
    }

    /// Reads incremental log lines for a job.
    ///
    /// Running jobs stream from the live ring buffer; finished jobs from
    /// their persisted log file, if one was kept.
    pub fn stream_log(&self, id: &JobId, offset: u64) -> Result<LogChunk, EngineError> {
        let job = self
            .shared
            .store
            .get(id)
            .ok_or_else(|| EngineError::UnknownJob(id.clone()))?;

        if let Some(buffer) = self.shared.live_logs.lock().get(id) {
            return Ok(buffer.read_from(offset));
        }
        if let Some(path) = &job.log_file_path {
            return Ok(self.shared.log_manager.read_persisted(path, offset)?);
        }
        Ok(LogChunk::default())
    }

    /// Log directory accounting.
    pub fn log_stats(&self) -> std::io::Result<LogDirStats> {
        self.shared.log_manager.stats()
    }

    /// Runs log retention now. The protected set is recomputed inside.
    pub fn cleanup_logs(&self) -> std::io::Result<CleanupResult> {
        self.shared.log_manager.cleanup(self.shared.store.as_ref())
    }

    /// Queries repository metadata through the retry policy.
    pub async fn query_repository_stats(
        &self,
        repository: &str,
    ) -> Result<RepositoryStats, ToolError> {
        execution::query_repository_info(&self.shared, repository).await
    }

    /// Token cancelled when the engine shuts down; trigger loops run under
    /// it so one call stops everything.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns a task tracked for shutdown (used by the scheduler loops).
    pub fn track<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    /// Cancels everything and waits for a graceful stop.
    ///
    /// Running tool processes are detached, not killed; the next startup's
    /// reconciliation re-adopts them by fingerprint.
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        if let Err(e) = self.shared.writer.commit_now() {
            warn!(error = %e, "Final commit on shutdown failed");
        }
    }

    /// Resumes supervision of a process adopted after a restart.
    fn resume_supervision(&self, job_id: JobId) {
        let shared = Arc::clone(&self.shared);
        let token = self.shutdown.clone();
        self.tasks.spawn(async move {
            let Some(job) = shared.store.get(&job_id) else {
                return;
            };
            let Some(identity) = job.process else {
                return;
            };

            let outcome = watch_adopted(
                identity,
                shared.store.as_ref(),
                &job_id,
                shared.process.heartbeat_interval,
                shared.process.termination_grace,
                &token,
            )
            .await;

            match outcome {
                SupervisionOutcome::ProcessGone => {
                    shared.store.update(&job_id, &mut |job| {
                        let _ = job.finish(
                            JobStatus::Failed,
                            Some(ADOPTED_EXIT_UNOBSERVABLE.to_string()),
                        );
                        job.process = None;
                    });
                }
                SupervisionOutcome::Cancelled { process_terminated } => {
                    let reason = if process_terminated {
                        "terminated after cancellation request"
                    } else {
                        "cancellation requested, process had already exited"
                    };
                    shared.store.update(&job_id, &mut |job| {
                        job.record_cancellation(reason);
                        job.process = None;
                    });
                }
                SupervisionOutcome::Detached => {
                    // Shutdown again before the process finished; leave the
                    // row running for the next reconciliation.
                    return;
                }
                // watch_adopted never reports these.
                SupervisionOutcome::Exited(_) | SupervisionOutcome::WaitError(_) => return,
            }

            if let Err(e) = shared.writer.commit_now() {
                warn!(job_id = %job_id, error = %e, "Commit after adopted-process exit failed");
            }
            if let Some(job) = shared.store.get(&job_id) {
                shared.notifier.notify(JobNotification::from_job(&job));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogSettings, SavePolicy};
    use crate::notify::NullNotifier;
    use crate::repo::{Repository, StaticRegistry};
    use crate::secrets::StaticSecretStore;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn test_config(log_dir: &std::path::Path) -> Config {
        Config {
            logs: LogSettings {
                directory: log_dir.to_path_buf(),
                save_policy: SavePolicy::AllJobs,
                buffer_lines: 100,
                max_age_days: None,
                max_total_size: None,
            },
            process: crate::config::ProcessSettings {
                heartbeat_interval: std::time::Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn engine_with(repositories: Vec<Repository>, log_dir: &std::path::Path) -> JobEngine {
        JobEngine::new(
            &test_config(log_dir),
            Arc::new(MemoryStore::new()),
            Arc::new(StaticRegistry::new(repositories)),
            Arc::new(StaticSecretStore::new()),
            Arc::new(NullNotifier),
        )
    }

    #[tokio::test]
    async fn unknown_repository_is_a_preflight_error() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(vec![], dir.path());

        let err = engine
            .create_job(JobKind::Check, "missing", JobParams::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownRepository(_)));
        assert!(engine.jobs().is_empty());
    }

    #[tokio::test]
    async fn maintenance_conflict_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(vec![Repository::new("main", "/srv/repo")], dir.path());

        // A running compact occupies the repository.
        let mut occupying = Job::new(JobKind::Compact, "main");
        occupying.status = JobStatus::Running;
        let occupying_id = occupying.id.clone();
        engine.shared.store.insert(occupying).unwrap();

        let err = engine
            .create_job(JobKind::Check, "main", JobParams::default())
            .unwrap_err();
        match err {
            EngineError::MaintenanceConflict {
                conflicting, kind, ..
            } => {
                assert_eq!(conflicting, occupying_id);
                assert_eq!(kind, JobKind::Check);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Non-maintenance kinds are not blocked.
        let backup = engine.create_job(
            JobKind::Backup,
            "main",
            JobParams {
                source_paths: vec!["/etc".into()],
                ..Default::default()
            },
        );
        assert!(backup.is_ok());
    }

    #[tokio::test]
    async fn cancel_before_start_terminates_without_spawn() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(vec![Repository::new("main", "/srv/repo")], dir.path());

        let mut handle = engine
            .create_job(JobKind::Check, "main", JobParams::default())
            .unwrap();
        // Cancel immediately; with luck the execution task has not spawned
        // the process yet, and either way the run terminates cleanly.
        engine.cancel(handle.id());

        let job = handle.wait().await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());
        assert!(job.error_message.is_some());
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_false() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(vec![], dir.path());
        assert!(!engine.cancel(&JobId::new("missing")));
    }

    #[tokio::test]
    async fn stream_log_unknown_job_errors() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(vec![], dir.path());
        assert!(matches!(
            engine.stream_log(&JobId::new("missing"), 0),
            Err(EngineError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_jobs() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with(vec![Repository::new("main", "/srv/repo")], dir.path());
        engine.shutdown().await;

        let err = engine
            .create_job(JobKind::Check, "main", JobParams::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::ShuttingDown));
    }
}
