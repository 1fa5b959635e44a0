//! Process identity fingerprinting.
//!
//! The OS reuses PIDs, so a stored PID alone cannot prove that a `running`
//! job's process survived a service restart. The process start time (seconds
//! since the epoch, read from the process table) serves as a fingerprint:
//! a reused PID gets a different start time.

use crate::job::ProcessIdentity;
use sysinfo::{Pid, ProcessRefreshKind, System};

/// Reads the start-time fingerprint of a live process, if it exists.
pub fn probe_fingerprint(pid: u32) -> Option<u64> {
    let mut system = System::new();
    let target = Pid::from_u32(pid);
    system.refresh_process_specifics(target, ProcessRefreshKind::new());
    system.process(target).map(|process| process.start_time())
}

/// Captures the identity of a just-spawned process.
///
/// Called immediately after spawn, before any output is read, so the job
/// row carries a valid fingerprint even if the process exits instantly. If
/// the process is already gone from the table, the fingerprint is recorded
/// as 0; reconciliation treats that as "not verifiable" and the normal exit
/// path supersedes it anyway.
pub fn capture_identity(pid: u32) -> ProcessIdentity {
    ProcessIdentity {
        pid,
        start_fingerprint: probe_fingerprint(pid).unwrap_or(0),
    }
}

/// Compares a stored identity against the live process table.
pub fn identity_matches(stored: &ProcessIdentity) -> bool {
    stored.start_fingerprint != 0
        && probe_fingerprint(stored.pid) == Some(stored.start_fingerprint)
}
