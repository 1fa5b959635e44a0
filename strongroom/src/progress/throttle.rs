//! Progress-message throttling.
//!
//! The tool re-emits its current message with every percentage tick, which
//! would amplify one logical update into dozens of store writes. The
//! throttle lets a changed message through immediately but holds an
//! unchanged one back until the interval has passed.

use std::time::{Duration, Instant};

/// Rate limiter for repeated identical progress messages.
#[derive(Debug)]
pub struct MessageThrottle {
    interval: Duration,
    last_message: Option<String>,
    last_applied: Option<Instant>,
}

impl MessageThrottle {
    /// Creates a throttle with the given minimum repeat interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_message: None,
            last_applied: None,
        }
    }

    /// Decides whether `message` should be applied at `now`.
    ///
    /// A message different from the previous one always passes. The same
    /// message passes again only after the interval has elapsed.
    pub fn admit(&mut self, message: &str, now: Instant) -> bool {
        let unchanged = self.last_message.as_deref() == Some(message);
        if unchanged {
            match self.last_applied {
                Some(at) if now.duration_since(at) < self.interval => return false,
                _ => {}
            }
        }
        self.last_message = Some(message.to_string());
        self.last_applied = Some(now);
        true
    }
}
