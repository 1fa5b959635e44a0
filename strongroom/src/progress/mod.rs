//! Progress stream interpretation.
//!
//! The tool interleaves structured JSON events and plain text on its output
//! streams. [`parse_line`] classifies one line at a time; a per-job
//! [`ProgressTracker`] folds the structured events into normalized progress
//! state (percentage, message, counters) with message throttling.

mod event;
mod throttle;
mod tracker;

pub use event::{parse_line, ParsedLine, ToolEvent, MSGID_CHECK_ARCHIVES, MSGID_CHECK_REPOSITORY};
pub use throttle::MessageThrottle;
pub use tracker::{ProgressSnapshot, ProgressTracker};
