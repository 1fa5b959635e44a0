//! Cancellation supervision.
//!
//! Every running job has a supervision loop that owns the child process:
//! it waits for exit while polling the store on a heartbeat. When an
//! external caller marks the job cancelled, the loop sends a graceful
//! terminate signal, waits out a grace period, then force-kills. The
//! cancellation latency is therefore bounded by
//! `heartbeat_interval + termination_grace`, not instantaneous.
//!
//! Service shutdown detaches instead of killing: the tool process keeps
//! running and the orphan tracker re-verifies it by fingerprint on the next
//! startup.

use super::identity::{identity_matches, probe_fingerprint};
use crate::job::{JobId, JobStatus, ProcessIdentity};
use crate::store::JobStore;
use std::time::Duration;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one supervised run ended.
#[derive(Debug)]
pub enum SupervisionOutcome {
    /// The process exited on its own.
    Exited(std::process::ExitStatus),

    /// The job was cancelled. `process_terminated` distinguishes "process
    /// found and terminated" from "process already gone".
    Cancelled { process_terminated: bool },

    /// Service shutdown: supervision stopped, the process was left running.
    Detached,

    /// An adopted process disappeared; its exit status is unobservable.
    ProcessGone,

    /// Waiting on the child failed at the OS level.
    WaitError(std::io::Error),
}

/// Supervises a child process this service spawned.
pub async fn supervise(
    mut child: Child,
    store: &dyn JobStore,
    job_id: &JobId,
    heartbeat_interval: Duration,
    termination_grace: Duration,
    shutdown: &CancellationToken,
) -> SupervisionOutcome {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Consume the immediate first tick.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(job_id = %job_id, "Shutdown: detaching from running process");
                return SupervisionOutcome::Detached;
            }

            status = child.wait() => {
                return match status {
                    Ok(status) => SupervisionOutcome::Exited(status),
                    Err(e) => SupervisionOutcome::WaitError(e),
                };
            }

            _ = heartbeat.tick() => {
                let cancelled = store
                    .get(job_id)
                    .map(|job| job.status == JobStatus::Cancelled)
                    .unwrap_or(false);
                if cancelled {
                    let process_terminated =
                        terminate_with_grace(&mut child, termination_grace).await;
                    return SupervisionOutcome::Cancelled { process_terminated };
                }
            }
        }
    }
}

/// Terminates a child: graceful signal, grace period, then force kill.
///
/// Returns true if the process was still alive and had to be terminated,
/// false if it was already gone.
async fn terminate_with_grace(child: &mut Child, grace: Duration) -> bool {
    // Already exited?
    if matches!(child.try_wait(), Ok(Some(_))) {
        return false;
    }

    let Some(pid) = child.id() else {
        return false;
    };

    send_terminate(pid);
    debug!(pid, grace_secs = grace.as_secs(), "Sent terminate signal");

    tokio::select! {
        result = child.wait() => {
            debug!(pid, ok = result.is_ok(), "Process exited within grace period");
        }
        _ = tokio::time::sleep(grace) => {
            warn!(pid, "Grace period expired, force-killing process");
            // kill() sends SIGKILL and reaps.
            if let Err(e) = child.kill().await {
                warn!(pid, error = %e, "Force kill failed");
            }
        }
    }
    true
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) {
    // No graceful signal on this platform; the grace period expires and the
    // force kill path applies.
}

/// Supervises a process adopted after a restart.
///
/// The service is not the parent, so the exit status is unobservable; the
/// loop polls the process-table fingerprint instead. Cancellation kills by
/// pid with the same terminate/grace/kill escalation.
pub async fn watch_adopted(
    identity: ProcessIdentity,
    store: &dyn JobStore,
    job_id: &JobId,
    heartbeat_interval: Duration,
    termination_grace: Duration,
    shutdown: &CancellationToken,
) -> SupervisionOutcome {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(job_id = %job_id, "Shutdown: detaching from adopted process");
                return SupervisionOutcome::Detached;
            }

            _ = heartbeat.tick() => {
                let cancelled = store
                    .get(job_id)
                    .map(|job| job.status == JobStatus::Cancelled)
                    .unwrap_or(false);

                if cancelled {
                    let alive = identity_matches(&identity);
                    if alive {
                        send_terminate(identity.pid);
                        wait_for_disappearance(&identity, termination_grace).await;
                        if identity_matches(&identity) {
                            send_kill(identity.pid);
                        }
                    }
                    return SupervisionOutcome::Cancelled {
                        process_terminated: alive,
                    };
                }

                if !identity_matches(&identity) {
                    return SupervisionOutcome::ProcessGone;
                }
            }
        }
    }
}

/// Polls until the fingerprint no longer matches or the grace expires.
async fn wait_for_disappearance(identity: &ProcessIdentity, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    let poll = Duration::from_millis(200);
    while tokio::time::Instant::now() < deadline {
        if probe_fingerprint(identity.pid) != Some(identity.start_fingerprint) {
            return;
        }
        tokio::time::sleep(poll.min(grace)).await;
    }
}

#[cfg(unix)]
fn send_kill(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn send_kill(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobKind};
    use crate::store::{JobStoreExt, MemoryStore};
    use std::process::Stdio;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::process::Command;

    const HEARTBEAT: Duration = Duration::from_millis(50);
    const GRACE: Duration = Duration::from_millis(500);

    fn spawn_shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap()
    }

    fn running_job(store: &MemoryStore) -> JobId {
        let mut job = Job::new(JobKind::Backup, "main");
        job.status = JobStatus::Running;
        let id = job.id.clone();
        store.insert(job).unwrap();
        id
    }

    #[tokio::test]
    async fn natural_exit_is_reported() {
        let store = MemoryStore::new();
        let id = running_job(&store);
        let child = spawn_shell("exit 0");

        let outcome = supervise(
            child,
            &store,
            &id,
            HEARTBEAT,
            GRACE,
            &CancellationToken::new(),
        )
        .await;
        match outcome {
            SupervisionOutcome::Exited(status) => assert!(status.success()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let store = MemoryStore::new();
        let id = running_job(&store);
        let child = spawn_shell("exit 2");

        let outcome = supervise(
            child,
            &store,
            &id,
            HEARTBEAT,
            GRACE,
            &CancellationToken::new(),
        )
        .await;
        match outcome {
            SupervisionOutcome::Exited(status) => assert_eq!(status.code(), Some(2)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_terminates_within_bound() {
        let store = Arc::new(MemoryStore::new());
        let id = running_job(&store);
        let child = spawn_shell("sleep 30");

        store.request_cancel(&id);

        let started = Instant::now();
        let outcome = supervise(
            child,
            store.as_ref(),
            &id,
            HEARTBEAT,
            GRACE,
            &CancellationToken::new(),
        )
        .await;
        let elapsed = started.elapsed();

        match outcome {
            SupervisionOutcome::Cancelled { process_terminated } => {
                assert!(process_terminated);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Latency bound: heartbeat + grace, with scheduling slack.
        assert!(
            elapsed < HEARTBEAT + GRACE + Duration::from_secs(2),
            "took {elapsed:?}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn term_resistant_process_is_force_killed() {
        let store = Arc::new(MemoryStore::new());
        let id = running_job(&store);
        // Ignores SIGTERM; only SIGKILL can take it down.
        let child = spawn_shell("trap '' TERM; sleep 30");
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        store.request_cancel(&id);

        let outcome = supervise(
            child,
            store.as_ref(),
            &id,
            HEARTBEAT,
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await;
        match outcome {
            SupervisionOutcome::Cancelled { process_terminated } => {
                assert!(process_terminated);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_detaches_without_killing() {
        let store = Arc::new(MemoryStore::new());
        let id = running_job(&store);
        let child = spawn_shell("sleep 30");
        let pid = child.id().unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = supervise(
            child,
            store.as_ref(),
            &id,
            HEARTBEAT,
            GRACE,
            &shutdown,
        )
        .await;
        assert!(matches!(outcome, SupervisionOutcome::Detached));

        // The process must still be alive after detaching.
        assert!(probe_fingerprint(pid).is_some());
        send_kill(pid);
    }

    #[tokio::test]
    async fn adopted_process_gone_is_detected() {
        let store = Arc::new(MemoryStore::new());
        let id = running_job(&store);

        // A fingerprint no live process has.
        let identity = ProcessIdentity {
            pid: u32::MAX - 13,
            start_fingerprint: 12345,
        };

        let outcome = watch_adopted(
            identity,
            store.as_ref(),
            &id,
            HEARTBEAT,
            GRACE,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(outcome, SupervisionOutcome::ProcessGone));
    }
}
