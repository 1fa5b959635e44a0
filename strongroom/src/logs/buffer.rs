//! Bounded in-memory log ring buffer.
//!
//! Keeps the last N lines of a run's output. Lines carry a monotonically
//! increasing absolute index, so an incremental reader's offset stays valid
//! even after old lines have been evicted.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A chunk of log lines returned to an incremental reader.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogChunk {
    /// Absolute index of the first line in `lines`.
    pub start: u64,
    /// The lines themselves.
    pub lines: Vec<String>,
    /// Offset to pass on the next call.
    pub next_offset: u64,
}

struct Inner {
    lines: VecDeque<String>,
    capacity: usize,
    /// Absolute index of `lines[0]`.
    start_index: u64,
}

/// Thread-safe ring buffer of output lines.
pub struct LogBuffer {
    inner: Mutex<Inner>,
}

impl LogBuffer {
    /// Creates a buffer holding at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lines: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                start_index: 0,
            }),
        }
    }

    /// Appends a line, evicting the oldest if at capacity.
    pub fn push(&self, line: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.lines.len() == inner.capacity {
            inner.lines.pop_front();
            inner.start_index += 1;
        }
        inner.lines.push_back(line.into());
    }

    /// Number of lines currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    /// True if no lines are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of lines ever pushed.
    pub fn end_index(&self) -> u64 {
        let inner = self.inner.lock();
        inner.start_index + inner.lines.len() as u64
    }

    /// Returns all lines at or after the absolute `offset`.
    ///
    /// An offset older than the buffer's start is clamped forward: the
    /// reader gets everything still available, and `start` tells it how
    /// much it missed.
    pub fn read_from(&self, offset: u64) -> LogChunk {
        let inner = self.inner.lock();
        let end = inner.start_index + inner.lines.len() as u64;
        let from = offset.clamp(inner.start_index, end);
        let skip = (from - inner.start_index) as usize;
        let lines: Vec<String> = inner.lines.iter().skip(skip).cloned().collect();
        LogChunk {
            start: from,
            lines,
            next_offset: end,
        }
    }

    /// Snapshot of every line currently held, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().lines.iter().cloned().collect()
    }
}
