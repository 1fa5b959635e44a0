//! Structured tool events.
//!
//! One line of tool output is either a JSON event carrying a `type`
//! discriminator, or raw text destined only for the log buffer. The event
//! set is closed: anything the decoder does not recognize is raw.

use serde::Deserialize;

/// Msgid prefix for the repository/segment scan phase of a check run.
pub const MSGID_CHECK_REPOSITORY: &str = "check.repository";

/// Msgid prefix for the archive scan phase of a check run.
pub const MSGID_CHECK_ARCHIVES: &str = "check.archives";

/// A structured event decoded from one line of tool output.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// Byte/file counters emitted while an archive is being written.
    ArchiveProgress {
        #[serde(default)]
        original_size: u64,
        #[serde(default)]
        compressed_size: u64,
        #[serde(default)]
        deduplicated_size: u64,
        #[serde(default)]
        nfiles: u64,
        /// Path currently being processed.
        #[serde(default)]
        path: Option<String>,
        /// Set on the closing event of the stream, which carries no
        /// counters.
        #[serde(default)]
        finished: bool,
    },

    /// Percentage progress for an operation identified by `msgid`.
    ProgressPercent {
        #[serde(default)]
        msgid: Option<String>,
        #[serde(default)]
        current: Option<u64>,
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        finished: bool,
    },

    /// Free-text phase message.
    ProgressMessage {
        #[serde(default)]
        msgid: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        finished: bool,
    },

    /// A log record the tool emits on its error stream.
    LogMessage {
        #[serde(default)]
        levelname: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        msgid: Option<String>,
    },
}

/// Classification of one output line.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedLine {
    /// A recognized structured event.
    Event(ToolEvent),
    /// Anything else; goes to the log buffer only.
    Raw,
}

/// Attempts a structured decode of one line.
///
/// Unknown `type` values and malformed JSON are both `Raw`: the closed
/// event set means the engine never guesses at half-recognized payloads.
pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return ParsedLine::Raw;
    }
    match serde_json::from_str::<ToolEvent>(trimmed) {
        Ok(event) => ParsedLine::Event(event),
        Err(_) => ParsedLine::Raw,
    }
}
