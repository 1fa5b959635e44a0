//! Two-pass log retention.
//!
//! Pass (a) deletes files older than the configured age; pass (b) deletes
//! the oldest remaining files until the directory is under its size cap.
//! Paths in the protected set — the log files of currently running jobs —
//! are skipped unconditionally in both passes.

use super::stats::{collect_log_files, LogFileInfo};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Result of one cleanup invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Files deleted by the age pass.
    pub deleted_by_age: usize,
    /// Files deleted by the size pass.
    pub deleted_by_size: usize,
    /// Total bytes freed.
    pub bytes_freed: u64,
    /// Deletions skipped because the path was protected.
    pub protected_skipped: usize,
    /// Directory size before cleanup.
    pub size_before: u64,
    /// Directory size after cleanup.
    pub size_after: u64,
}

/// Runs both retention passes over the log directory.
///
/// `protected` must be the freshly computed set of log paths belonging to
/// running jobs; the caller recomputes it on every invocation.
pub(super) fn cleanup_log_dir(
    dir: &Path,
    max_age_days: Option<u32>,
    max_total_size: Option<u64>,
    protected: &HashSet<PathBuf>,
    now: SystemTime,
) -> io::Result<CleanupResult> {
    let mut files = collect_log_files(dir)?;
    let mut result = CleanupResult {
        size_before: files.iter().map(|f| f.size).sum(),
        ..Default::default()
    };
    let mut remaining = result.size_before;

    // Pass (a): age.
    if let Some(days) = max_age_days {
        let cutoff = now - Duration::from_secs(u64::from(days) * 24 * 60 * 60);
        files.retain(|file| {
            if file.mtime >= cutoff {
                return true;
            }
            if protected.contains(&file.path) {
                result.protected_skipped += 1;
                return true;
            }
            match delete(file) {
                Ok(()) => {
                    result.deleted_by_age += 1;
                    result.bytes_freed += file.size;
                    remaining = remaining.saturating_sub(file.size);
                    false
                }
                Err(()) => true,
            }
        });
    }

    // Pass (b): size, oldest first.
    if let Some(cap) = max_total_size {
        if remaining > cap {
            files.sort_by_key(|file| file.mtime);
            for file in &files {
                if remaining <= cap {
                    break;
                }
                if protected.contains(&file.path) {
                    result.protected_skipped += 1;
                    continue;
                }
                if delete(file).is_ok() {
                    result.deleted_by_size += 1;
                    result.bytes_freed += file.size;
                    remaining = remaining.saturating_sub(file.size);
                }
            }
            if remaining > cap {
                warn!(
                    remaining_bytes = remaining,
                    cap_bytes = cap,
                    "Log cleanup could not reach the size cap"
                );
            }
        }
    }

    result.size_after = remaining;
    info!(
        deleted_by_age = result.deleted_by_age,
        deleted_by_size = result.deleted_by_size,
        bytes_freed = result.bytes_freed,
        protected_skipped = result.protected_skipped,
        size_after = result.size_after,
        "Log cleanup complete"
    );
    Ok(result)
}

/// Deletes one file, tolerating concurrent removal.
fn delete(file: &LogFileInfo) -> Result<(), ()> {
    match std::fs::remove_file(&file.path) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                path = %file.path.display(),
                error = %e,
                "Failed to delete log file during cleanup"
            );
            Err(())
        }
    }
}
