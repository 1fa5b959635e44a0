//! Per-job progress state.
//!
//! The tracker owns the normalized view of a run's progress: the overall
//! percentage, the current message, and the byte/file counters. It is fed
//! decoded [`ToolEvent`]s and reports after each one whether anything worth
//! writing to the store changed.

use super::event::{ToolEvent, MSGID_CHECK_ARCHIVES, MSGID_CHECK_REPOSITORY};
use super::throttle::MessageThrottle;
use crate::job::{JobKind, JobStats};
use std::time::{Duration, Instant};

/// Immutable view of the tracked progress state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Overall progress, 0-100.
    pub percent: u8,
    /// Most recent admitted progress message.
    pub message: Option<String>,
    /// Byte/file counters, for kinds that report them.
    pub stats: JobStats,
}

/// Folds tool events into normalized progress for one job.
pub struct ProgressTracker {
    kind: JobKind,
    snapshot: ProgressSnapshot,
    throttle: MessageThrottle,
}

impl ProgressTracker {
    /// Creates a tracker for a job of the given kind.
    pub fn new(kind: JobKind, message_interval: Duration) -> Self {
        Self {
            kind,
            snapshot: ProgressSnapshot::default(),
            throttle: MessageThrottle::new(message_interval),
        }
    }

    /// Returns the current progress state.
    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    /// Applies one event at `now`. Returns true if the snapshot changed.
    ///
    /// Percentages and counters apply immediately; message text goes
    /// through the throttle. A `finished` event with no numeric payload
    /// never overwrites the last good percentage or counters.
    pub fn apply(&mut self, event: &ToolEvent, now: Instant) -> bool {
        match event {
            ToolEvent::ArchiveProgress {
                original_size,
                compressed_size,
                deduplicated_size,
                nfiles,
                path,
                finished,
            } => {
                let mut changed = false;
                if !*finished {
                    let stats = JobStats {
                        original_bytes: *original_size,
                        compressed_bytes: *compressed_size,
                        deduplicated_bytes: *deduplicated_size,
                        nfiles: *nfiles,
                    };
                    if stats != self.snapshot.stats {
                        self.snapshot.stats = stats;
                        changed = true;
                    }
                    if let Some(path) = path {
                        changed |= self.admit_message(path, now);
                    }
                }
                changed
            }

            ToolEvent::ProgressPercent {
                msgid,
                current,
                total,
                message,
                finished: _,
            } => {
                let mut changed = false;
                // A closing event without counters keeps the last good
                // percentage.
                if let (Some(current), Some(total)) = (current, total) {
                    let percent = self.map_percent(msgid.as_deref(), *current, *total);
                    if percent != self.snapshot.percent {
                        self.snapshot.percent = percent;
                        changed = true;
                    }
                }
                if let Some(message) = message {
                    if !message.is_empty() {
                        changed |= self.admit_message(message, now);
                    }
                }
                changed
            }

            ToolEvent::ProgressMessage {
                message, finished, ..
            } => match message {
                Some(message) if !message.is_empty() && !*finished => {
                    self.admit_message(message, now)
                }
                _ => false,
            },

            // Log records carry no progress.
            ToolEvent::LogMessage { .. } => false,
        }
    }

    fn admit_message(&mut self, message: &str, now: Instant) -> bool {
        if self.throttle.admit(message, now) {
            self.snapshot.message = Some(message.to_string());
            true
        } else {
            false
        }
    }

    /// Maps an operation's current/total into the overall percentage.
    ///
    /// A check run reports two sequential phases that each count from zero:
    /// the segment scan fills 0-50 and the archive scan fills 50-100. Every
    /// other operation maps linearly.
    fn map_percent(&self, msgid: Option<&str>, current: u64, total: u64) -> u8 {
        if total == 0 {
            return self.snapshot.percent;
        }
        let ratio = (current as f64 / total as f64).clamp(0.0, 1.0);
        let percent = if self.kind == JobKind::Check {
            match msgid {
                Some(id) if id.starts_with(MSGID_CHECK_REPOSITORY) => ratio * 50.0,
                Some(id) if id.starts_with(MSGID_CHECK_ARCHIVES) => 50.0 + ratio * 50.0,
                _ => ratio * 100.0,
            }
        } else {
            ratio * 100.0
        };
        percent.round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::event::{parse_line, ParsedLine};

    const MSG_INTERVAL: Duration = Duration::from_secs(2);

    fn event(json: &str) -> ToolEvent {
        match parse_line(json) {
            ParsedLine::Event(e) => e,
            ParsedLine::Raw => panic!("expected event: {json}"),
        }
    }

    fn tracker(kind: JobKind) -> ProgressTracker {
        ProgressTracker::new(kind, MSG_INTERVAL)
    }

    #[test]
    fn check_phases_map_into_disjoint_halves() {
        let mut t = tracker(JobKind::Check);
        let now = Instant::now();

        let phase1 = event(
            r#"{"type": "progress_percent", "msgid": "check.repository", "current": 50, "total": 100}"#,
        );
        assert!(t.apply(&phase1, now));
        assert_eq!(t.snapshot().percent, 25);

        let phase2 = event(
            r#"{"type": "progress_percent", "msgid": "check.archives", "current": 100, "total": 100, "finished": true}"#,
        );
        assert!(t.apply(&phase2, now));
        assert_eq!(t.snapshot().percent, 100);
    }

    #[test]
    fn non_check_kinds_map_linearly() {
        let mut t = tracker(JobKind::Prune);
        let e = event(
            r#"{"type": "progress_percent", "msgid": "prune", "current": 30, "total": 100}"#,
        );
        t.apply(&e, Instant::now());
        assert_eq!(t.snapshot().percent, 30);
    }

    #[test]
    fn finished_without_counters_keeps_last_percent() {
        let mut t = tracker(JobKind::Check);
        let now = Instant::now();

        let progress = event(
            r#"{"type": "progress_percent", "msgid": "check.archives", "current": 60, "total": 100}"#,
        );
        t.apply(&progress, now);
        assert_eq!(t.snapshot().percent, 80);

        let closing =
            event(r#"{"type": "progress_percent", "msgid": "check.archives", "finished": true}"#);
        assert!(!t.apply(&closing, now));
        assert_eq!(t.snapshot().percent, 80);
    }

    #[test]
    fn zero_total_keeps_last_percent() {
        let mut t = tracker(JobKind::Restore);
        let good = event(r#"{"type": "progress_percent", "current": 4, "total": 10}"#);
        t.apply(&good, Instant::now());
        assert_eq!(t.snapshot().percent, 40);

        let degenerate = event(r#"{"type": "progress_percent", "current": 0, "total": 0}"#);
        t.apply(&degenerate, Instant::now());
        assert_eq!(t.snapshot().percent, 40);
    }

    #[test]
    fn archive_counters_apply_immediately() {
        let mut t = tracker(JobKind::Backup);
        let now = Instant::now();

        let e1 = event(
            r#"{"type": "archive_progress", "original_size": 100, "compressed_size": 60, "deduplicated_size": 20, "nfiles": 1, "path": "/a"}"#,
        );
        assert!(t.apply(&e1, now));
        assert_eq!(t.snapshot().stats.original_bytes, 100);
        assert_eq!(t.snapshot().message.as_deref(), Some("/a"));

        let e2 = event(
            r#"{"type": "archive_progress", "original_size": 200, "compressed_size": 90, "deduplicated_size": 25, "nfiles": 2, "path": "/a"}"#,
        );
        // Same path within the throttle window: counters still update.
        assert!(t.apply(&e2, now + Duration::from_millis(10)));
        assert_eq!(t.snapshot().stats.nfiles, 2);
    }

    #[test]
    fn finished_archive_event_keeps_counters() {
        let mut t = tracker(JobKind::Backup);
        let now = Instant::now();

        let progress = event(
            r#"{"type": "archive_progress", "original_size": 500, "compressed_size": 300, "deduplicated_size": 100, "nfiles": 9, "path": "/b"}"#,
        );
        t.apply(&progress, now);

        // The closing event carries zeroed counters and finished=true; the
        // last good numbers must survive.
        let closing = event(r#"{"type": "archive_progress", "finished": true}"#);
        assert!(!t.apply(&closing, now));
        assert_eq!(t.snapshot().stats.original_bytes, 500);
        assert_eq!(t.snapshot().stats.nfiles, 9);
    }

    #[test]
    fn repeated_message_is_throttled_but_percent_is_not() {
        let mut t = tracker(JobKind::Restore);
        let t0 = Instant::now();

        let e1 = event(
            r#"{"type": "progress_percent", "current": 1, "total": 10, "message": "Extracting"}"#,
        );
        assert!(t.apply(&e1, t0));
        assert_eq!(t.snapshot().percent, 10);

        // Same message 100ms later with a new percentage: the percent
        // update lands, the message re-apply is suppressed.
        let e2 = event(
            r#"{"type": "progress_percent", "current": 2, "total": 10, "message": "Extracting"}"#,
        );
        assert!(t.apply(&e2, t0 + Duration::from_millis(100)));
        assert_eq!(t.snapshot().percent, 20);

        // Identical message and identical percent within the window: no
        // change at all.
        let e3 = event(
            r#"{"type": "progress_percent", "current": 2, "total": 10, "message": "Extracting"}"#,
        );
        assert!(!t.apply(&e3, t0 + Duration::from_millis(200)));
    }

    #[test]
    fn log_messages_carry_no_progress() {
        let mut t = tracker(JobKind::Backup);
        let e = event(
            r#"{"type": "log_message", "levelname": "WARNING", "name": "files", "message": "file changed while we backed it up"}"#,
        );
        assert!(!t.apply(&e, Instant::now()));
        assert_eq!(t.snapshot(), &ProgressSnapshot::default());
    }
}
