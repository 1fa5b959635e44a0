//! Log directory accounting.
//!
//! Log files are not stored as entities; everything the engine reports about
//! them is derived by scanning the directory. File names are deterministic
//! (`{kind}-{job_id}-{timestamp}.log`), which is what lets the scan infer a
//! per-kind breakdown.

use crate::job::JobKind;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// One discovered log file.
#[derive(Clone, Debug)]
pub struct LogFileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: SystemTime,
    /// Job kind inferred from the file name, when recognizable.
    pub kind: Option<JobKind>,
}

/// Per-kind slice of the accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindBreakdown {
    pub files: usize,
    pub bytes: u64,
}

/// Aggregate view of the log directory.
#[derive(Clone, Debug, Default)]
pub struct LogDirStats {
    pub total_bytes: u64,
    pub file_count: usize,
    pub oldest_mtime: Option<SystemTime>,
    pub newest_mtime: Option<SystemTime>,
    /// Breakdown keyed by kind label; unrecognized files land under "other".
    pub by_kind: HashMap<String, KindBreakdown>,
}

/// Collects every `.log` file in the directory with size and mtime.
///
/// A missing directory is an empty result, not an error; the directory is
/// created lazily on first persist.
pub fn collect_log_files(dir: &Path) -> io::Result<Vec<LogFileInfo>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable log file");
                continue;
            }
        };
        let kind = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(infer_kind);
        files.push(LogFileInfo {
            size: metadata.len(),
            mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            kind,
            path,
        });
    }
    Ok(files)
}

/// Scans the directory and aggregates totals, mtime range and per-kind
/// breakdown.
pub fn scan_log_dir(dir: &Path) -> io::Result<LogDirStats> {
    let files = collect_log_files(dir)?;
    let mut stats = LogDirStats {
        file_count: files.len(),
        ..Default::default()
    };

    for file in &files {
        stats.total_bytes += file.size;
        stats.oldest_mtime = Some(match stats.oldest_mtime {
            Some(oldest) => oldest.min(file.mtime),
            None => file.mtime,
        });
        stats.newest_mtime = Some(match stats.newest_mtime {
            Some(newest) => newest.max(file.mtime),
            None => file.mtime,
        });

        let key = file
            .kind
            .map(|k| k.label().to_string())
            .unwrap_or_else(|| "other".to_string());
        let slot = stats.by_kind.entry(key).or_default();
        slot.files += 1;
        slot.bytes += file.size;
    }

    Ok(stats)
}

/// Infers the job kind from a log file name.
///
/// Labels are matched longest-first so `delete-archive-...` is not read as
/// an unknown `delete` kind.
fn infer_kind(file_name: &str) -> Option<JobKind> {
    const LABELS: [JobKind; 6] = [
        JobKind::DeleteArchive,
        JobKind::Backup,
        JobKind::Restore,
        JobKind::Compact,
        JobKind::Check,
        JobKind::Prune,
    ];
    LABELS
        .into_iter()
        .find(|kind| file_name.starts_with(&format!("{}-", kind.label())))
}
