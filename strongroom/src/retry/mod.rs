//! Bounded retry for read-only tool calls.
//!
//! Metadata queries (repository info, archive listings) can fail on
//! transient contention. The [`RetryPolicy`] retries those with exponential
//! backoff. Long-running mutating operations are never routed through it;
//! the engine calls them exactly once.
//!
//! Lock-wait timeouts get their own [`ToolError::LockTimeout`] variant so a
//! caller can offer manual remediation (breaking a stale lock) instead of
//! blind retrying.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Marker the tool puts on lock acquisition failures.
const LOCK_MSGIDS: [&str; 2] = ["LockTimeout", "LockFailed"];

/// Stderr fragments that indicate transient transport trouble.
const TRANSIENT_MARKERS: [&str; 4] = [
    "connection closed",
    "connection refused",
    "connection reset",
    "temporarily unavailable",
];

/// A failed tool invocation, classified.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool could not acquire the repository lock within its wait
    /// window. Not retried automatically; surfaced for manual remediation.
    #[error("repository is locked by another process: {detail}")]
    LockTimeout { detail: String },

    /// Transient infrastructure failure (transport, contention). Eligible
    /// for automatic retry.
    #[error("transient tool failure: {detail}")]
    Transient { detail: String },

    /// Everything else: bad invocation, corrupt repository, hard errors.
    #[error("tool failed: {detail}")]
    Fatal { detail: String },

    /// The process could not be spawned at all.
    #[error("failed to spawn tool: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ToolError {
    /// True for errors the retry policy may try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// True when the failure is lock contention.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Classifies a failed invocation from its stderr tail and the msgid of
    /// the last structured error event, if one was seen.
    pub fn classify(stderr_tail: &str, last_msgid: Option<&str>) -> Self {
        if let Some(msgid) = last_msgid {
            if LOCK_MSGIDS.iter().any(|m| msgid == *m) {
                return Self::LockTimeout {
                    detail: stderr_tail.to_string(),
                };
            }
        }
        let lower = stderr_tail.to_lowercase();
        if lower.contains("failed to create/acquire the lock") {
            return Self::LockTimeout {
                detail: stderr_tail.to_string(),
            };
        }
        if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::Transient {
                detail: stderr_tail.to_string(),
            };
        }
        Self::Fatal {
            detail: stderr_tail.to_string(),
        }
    }
}

/// Bounded exponential backoff for idempotent tool calls.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy from configuration.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Runs `operation` with retries for transient failures.
    ///
    /// Non-transient errors (including lock timeouts) are returned on the
    /// first occurrence.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T, ToolError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient tool failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(operation = op_name, attempt, error = %e, "Tool call failed");
                    return Err(e);
                }
            }
        }
    }
}
