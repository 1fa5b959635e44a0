//! Per-job execution.
//!
//! One spawned task per job drives the whole run: pre-flight, hook, spawn,
//! the two stream readers, the supervision heartbeat, exit-code mapping and
//! finalization. Every failure inside is caught at the job boundary and
//! becomes a `failed` terminal state; nothing unwinds into the engine and no
//! path leaves the job stuck in `running`.

use super::command::{build_command, default_archive_name};
use super::error::EngineError;
use crate::config::{ProcessSettings, ToolSettings};
use crate::job::{JobId, JobKind, JobParams, JobStatus};
use crate::logs::{LogBuffer, LogManager};
use crate::notify::{JobNotification, Notifier};
use crate::process::{
    capture_identity, run_hook, supervise, HookError, ProcessRunner, SpawnError,
    SupervisionOutcome,
};
use crate::progress::{parse_line, ParsedLine, ProgressTracker, ToolEvent};
use crate::repo::RepositoryRegistry;
use crate::retry::{RetryPolicy, ToolError};
use crate::secrets::{SecretError, SecretStore};
use crate::store::{BatchedWriter, JobStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason recorded when cancellation lands before the process spawned.
pub(crate) const CANCELLED_BEFORE_START: &str = "cancelled before the process started";

/// Dependencies shared by the engine surface and every job task.
pub(crate) struct EngineShared {
    pub store: Arc<dyn JobStore>,
    pub writer: Arc<BatchedWriter>,
    pub registry: Arc<dyn RepositoryRegistry>,
    pub secrets: Arc<dyn SecretStore>,
    pub notifier: Arc<dyn Notifier>,
    pub log_manager: Arc<LogManager>,
    pub runner: ProcessRunner,
    pub tool: ToolSettings,
    pub process: ProcessSettings,
    pub retry: RetryPolicy,
    /// Live ring buffers of running jobs, keyed by job id.
    pub live_logs: Mutex<HashMap<JobId, Arc<LogBuffer>>>,
    /// Global concurrency bound; `None` when unbounded.
    pub job_semaphore: Option<Arc<Semaphore>>,
}

/// How the execution task ended.
enum RunEnd {
    /// The job reached a terminal state.
    Terminal,
    /// Service shutdown: the process was left running for the orphan
    /// tracker to re-adopt.
    Detached,
}

/// Failures caught at the job boundary.
#[derive(Debug, Error)]
enum RunFailure {
    #[error("unknown repository '{0}'")]
    UnknownRepository(String),

    #[error("failed to resolve secrets: {0}")]
    Secret(#[from] SecretError),

    #[error("pre-backup hook failed: {0}")]
    PreHook(#[from] HookError),

    #[error(transparent)]
    InvalidParams(EngineError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("failed waiting for process: {0}")]
    Wait(std::io::Error),

    #[error("job row disappeared from the store")]
    RowMissing,
}

/// Runs one job from pre-flight to finalization.
pub(crate) async fn run_job(
    shared: Arc<EngineShared>,
    job_id: JobId,
    params: JobParams,
    shutdown: CancellationToken,
) {
    let _permit = match &shared.job_semaphore {
        Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
            Ok(permit) => Some(permit),
            // Closed semaphore means the engine is gone.
            Err(_) => return,
        },
        None => None,
    };

    let buffer = Arc::new(shared.log_manager.new_buffer());
    shared
        .live_logs
        .lock()
        .insert(job_id.clone(), Arc::clone(&buffer));

    let end = match execute(&shared, &job_id, &params, &buffer, &shutdown).await {
        Ok(end) => end,
        Err(failure) => {
            error!(job_id = %job_id, error = %failure, "Job execution failed");
            buffer.push(format!("error: {failure}"));
            shared.store.update(&job_id, &mut |job| {
                if job.status == JobStatus::Cancelled {
                    job.record_cancellation(failure.to_string());
                } else {
                    let _ = job.finish(JobStatus::Failed, Some(failure.to_string()));
                }
            });
            RunEnd::Terminal
        }
    };

    shared.live_logs.lock().remove(&job_id);

    match end {
        RunEnd::Terminal => finalize_terminal(&shared, &job_id, &buffer).await,
        RunEnd::Detached => {
            // Commit so the next startup sees the pid and fingerprint.
            if let Err(e) = shared.writer.commit_now() {
                warn!(job_id = %job_id, error = %e, "Commit on detach failed");
            }
        }
    }
}

async fn execute(
    shared: &Arc<EngineShared>,
    job_id: &JobId,
    params: &JobParams,
    buffer: &Arc<LogBuffer>,
    shutdown: &CancellationToken,
) -> Result<RunEnd, RunFailure> {
    let job = shared.store.get(job_id).ok_or(RunFailure::RowMissing)?;

    // Cancelled while still pending: nothing to terminate.
    if job.status == JobStatus::Cancelled {
        shared.store.update(job_id, &mut |job| {
            job.record_cancellation(CANCELLED_BEFORE_START);
        });
        return Ok(RunEnd::Terminal);
    }

    let kind = job.kind;
    let repository = shared
        .registry
        .get(&job.repository)
        .ok_or_else(|| RunFailure::UnknownRepository(job.repository.clone()))?;

    // Secrets decrypt just-in-time; they live only in the env map handed to
    // the spawn.
    let secret_env = shared.secrets.tool_env(&repository.name)?;

    if kind == JobKind::Backup {
        if let Some(hook) = &repository.pre_hook {
            match run_hook(hook).await {
                Ok(()) => buffer.push("pre-backup hook completed"),
                Err(e) if hook.continue_on_failure => {
                    warn!(job_id = %job_id, error = %e, "Pre-backup hook failed, continuing");
                    buffer.push(format!("pre-backup hook failed (continuing): {e}"));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let archive = match kind {
        JobKind::Backup => Some(
            params
                .archive
                .clone()
                .unwrap_or_else(|| default_archive_name(&repository)),
        ),
        JobKind::Restore | JobKind::DeleteArchive => params.archive.clone(),
        _ => None,
    };

    let command = build_command(
        &shared.tool,
        &repository,
        kind,
        params,
        archive.as_deref(),
        secret_env,
    )
    .map_err(RunFailure::InvalidParams)?;

    let tool = shared.runner.spawn(command)?;
    let identity = capture_identity(tool.pid);
    info!(job_id = %job_id, pid = tool.pid, kind = %kind, "Tool process spawned");

    // Record the identity before reading any output, so the fingerprint is
    // on the row even if the process exits instantly.
    shared.store.update(job_id, &mut |job| {
        let _ = job.begin(identity);
        if kind == JobKind::Backup {
            job.archive_name = archive.clone();
        }
    });
    shared.writer.mark_dirty();

    // Three concurrent activities: stdout reader, stderr/progress reader,
    // and the supervision heartbeat. The readers are joined after the
    // process is gone; on detach they are aborted so nothing outlives the
    // run unsupervised.
    let mut stdout_task = tokio::spawn(read_plain_stream(tool.stdout, Arc::clone(buffer)));
    let mut stderr_task = tokio::spawn(read_progress_stream(
        tool.stderr,
        Arc::clone(buffer),
        Arc::clone(shared),
        job_id.clone(),
        kind,
    ));

    let outcome = supervise(
        tool.child,
        shared.store.as_ref(),
        job_id,
        shared.process.heartbeat_interval,
        shared.process.termination_grace,
        shutdown,
    )
    .await;

    if matches!(outcome, SupervisionOutcome::Detached) {
        stdout_task.abort();
        stderr_task.abort();
        return Ok(RunEnd::Detached);
    }

    // The process is gone, so the streams normally hit EOF right away. The
    // join is still bounded: a grandchild of the tool can inherit the pipe
    // write-ends and keep them open past the tool's own death.
    let drained = tokio::time::timeout(shared.process.termination_grace, async {
        let _ = (&mut stdout_task).await;
        (&mut stderr_task).await.unwrap_or_default()
    })
    .await;
    let summary = match drained {
        Ok(summary) => summary,
        Err(_) => {
            warn!(job_id = %job_id, "Output streams did not close, abandoning readers");
            stdout_task.abort();
            stderr_task.abort();
            StreamSummary::default()
        }
    };

    match outcome {
        SupervisionOutcome::Exited(status) => {
            finish_from_exit(shared, job_id, status, &summary);
        }
        SupervisionOutcome::Cancelled { process_terminated } => {
            let reason = if process_terminated {
                "terminated after cancellation request"
            } else {
                "cancellation requested, process had already exited"
            };
            info!(job_id = %job_id, process_terminated, "Job cancelled");
            shared.store.update(job_id, &mut |job| {
                job.record_cancellation(reason);
            });
        }
        SupervisionOutcome::ProcessGone => {
            // Only adopted processes report this; treat defensively.
            shared.store.update(job_id, &mut |job| {
                let _ = job.finish(
                    JobStatus::Failed,
                    Some("process disappeared during supervision".to_string()),
                );
            });
        }
        SupervisionOutcome::WaitError(e) => return Err(RunFailure::Wait(e)),
        // Handled before the readers were joined; kept for exhaustiveness.
        SupervisionOutcome::Detached => return Ok(RunEnd::Detached),
    }

    shared.writer.mark_dirty();
    Ok(RunEnd::Terminal)
}

/// Summary the progress-stream reader hands back for exit-code mapping.
#[derive(Debug, Default)]
struct StreamSummary {
    /// Message of the last ERROR-level log event, if any.
    last_error: Option<String>,
    /// Msgid of that event, used for lock classification.
    last_msgid: Option<String>,
}

/// Reads a plain output stream into the log buffer.
async fn read_plain_stream<R>(mut lines: Lines<R>, buffer: Arc<LogBuffer>)
where
    R: AsyncBufRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        buffer.push(line);
    }
}

/// Reads the progress-carrying stream: every line lands in the buffer, and
/// structured events additionally feed the progress tracker.
async fn read_progress_stream<R>(
    mut lines: Lines<R>,
    buffer: Arc<LogBuffer>,
    shared: Arc<EngineShared>,
    job_id: JobId,
    kind: JobKind,
) -> StreamSummary
where
    R: AsyncBufRead + Unpin,
{
    let mut tracker = ProgressTracker::new(kind, shared.process.progress_message_interval);
    let mut summary = StreamSummary::default();

    while let Ok(Some(line)) = lines.next_line().await {
        buffer.push(line.clone());

        let event = match parse_line(&line) {
            ParsedLine::Event(event) => event,
            ParsedLine::Raw => continue,
        };

        if let ToolEvent::LogMessage {
            levelname,
            message,
            msgid,
            ..
        } = &event
        {
            if levelname == "ERROR" {
                summary.last_error = Some(message.clone());
                summary.last_msgid = msgid.clone();
            }
        }

        // Progress mutations apply to the in-memory store immediately; the
        // batched writer owns how often they reach disk.
        if tracker.apply(&event, Instant::now()) {
            let snapshot = tracker.snapshot().clone();
            shared.store.update(&job_id, &mut |job| {
                if job.status == JobStatus::Running {
                    job.progress = snapshot.percent;
                    if snapshot.message.is_some() {
                        job.progress_message = snapshot.message.clone();
                    }
                    job.stats = snapshot.stats;
                }
            });
            shared.writer.mark_dirty();
        }
    }
    summary
}

/// Maps the tool's exit code onto the three-way terminal state.
///
/// 0 = success, 1 = success with warnings, everything else (and signal
/// deaths) = hard failure.
fn finish_from_exit(
    shared: &Arc<EngineShared>,
    job_id: &JobId,
    status: std::process::ExitStatus,
    summary: &StreamSummary,
) {
    let code = status.code();
    debug!(job_id = %job_id, code, "Tool process exited");

    shared.store.update(job_id, &mut |job| {
        if job.status == JobStatus::Cancelled {
            // Cancellation won the race; the exit is the consequence.
            job.record_cancellation("terminated after cancellation request");
            return;
        }
        match code {
            Some(0) => {
                job.progress = 100;
                let _ = job.finish(JobStatus::Completed, None);
            }
            Some(1) => {
                job.progress = 100;
                let _ = job.finish(JobStatus::CompletedWithWarnings, summary.last_error.clone());
            }
            Some(code) => {
                let detail = summary
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("tool exited with code {code}"));
                let classified = ToolError::classify(&detail, summary.last_msgid.as_deref());
                let _ = job.finish(JobStatus::Failed, Some(classified.to_string()));
            }
            None => {
                let _ = job.finish(
                    JobStatus::Failed,
                    Some("tool terminated by signal".to_string()),
                );
            }
        }
    });
}

/// Terminal-state bookkeeping: log persistence, post-hook, forced commit,
/// notification.
async fn finalize_terminal(shared: &Arc<EngineShared>, job_id: &JobId, buffer: &Arc<LogBuffer>) {
    let Some(job) = shared.store.get(job_id) else {
        return;
    };

    match shared.log_manager.persist(&job, buffer) {
        Ok(Some(path)) => {
            shared.store.update(job_id, &mut |job| {
                job.log_file_path = Some(path.clone());
                job.has_logs = true;
            });
        }
        Ok(None) => {}
        Err(e) => warn!(job_id = %job_id, error = %e, "Failed to persist job log"),
    }

    // Post-hook failures are logged, never change the outcome.
    if job.kind == JobKind::Backup {
        if let Some(repository) = shared.registry.get(&job.repository) {
            if let Some(hook) = &repository.post_hook {
                if let Err(e) = run_hook(hook).await {
                    warn!(job_id = %job_id, error = %e, "Post-backup hook failed");
                }
            }
        }
    }

    // Forced commit at terminal state, regardless of the batch interval.
    if let Err(e) = shared.writer.commit_now() {
        warn!(job_id = %job_id, error = %e, "Final store commit failed");
    }

    let final_job = shared.store.get(job_id).unwrap_or(job);
    shared.notifier.notify(JobNotification::from_job(&final_job));
}

/// Retry-wrapped repository metadata query used by the stats trigger.
pub(crate) async fn query_repository_info(
    shared: &Arc<EngineShared>,
    repository_name: &str,
) -> Result<crate::notify::RepositoryStats, ToolError> {
    let repository = shared
        .registry
        .get(repository_name)
        .ok_or_else(|| ToolError::Fatal {
            detail: format!("unknown repository '{repository_name}'"),
        })?;
    let secret_env = shared
        .secrets
        .tool_env(&repository.name)
        .map_err(|e| ToolError::Fatal {
            detail: e.to_string(),
        })?;
    let command =
        super::command::build_info_command(&shared.tool, &repository, secret_env);

    shared
        .retry
        .run("repository info", || {
            let command = command.clone();
            async move { run_info_command(command).await }
        })
        .await
}

/// Runs the info query once and parses its JSON document.
///
/// Metadata output is small, so buffering it whole is fine here — unlike
/// job output, which is streamed.
async fn run_info_command(
    command: crate::process::ToolCommand,
) -> Result<crate::notify::RepositoryStats, ToolError> {
    let mut cmd = tokio::process::Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);
    for (key, value) in &command.env {
        cmd.env(key, value);
    }

    let output = cmd.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let msgid = last_error_msgid(&stderr);
        return Err(ToolError::classify(stderr.trim(), msgid.as_deref()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_info_document(&stdout))
}

/// Finds the msgid of the last ERROR-level structured log line in stderr.
fn last_error_msgid(stderr: &str) -> Option<String> {
    stderr.lines().rev().find_map(|line| match parse_line(line) {
        ParsedLine::Event(ToolEvent::LogMessage {
            levelname, msgid, ..
        }) if levelname == "ERROR" => msgid,
        _ => None,
    })
}

/// Extracts the counters the stats trigger republishes.
fn parse_info_document(stdout: &str) -> crate::notify::RepositoryStats {
    let value: serde_json::Value = serde_json::from_str(stdout).unwrap_or_default();
    let stats = &value["cache"]["stats"];
    crate::notify::RepositoryStats {
        total_size: stats["total_size"].as_u64().unwrap_or(0),
        total_csize: stats["total_csize"].as_u64().unwrap_or(0),
        unique_csize: stats["unique_csize"].as_u64().unwrap_or(0),
        archive_count: value["archives"]
            .as_array()
            .map(|archives| archives.len() as u64)
            .unwrap_or(0),
    }
}
