//! Bounded hook execution.
//!
//! Backup jobs can carry pre/post hook commands. Each hook is a shell
//! invocation bounded by its own timeout; whether a failure propagates is
//! the hook's `continue_on_failure` decision, made by the caller.

use crate::repo::Hook;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Hook failures.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook could not be started.
    #[error("failed to start hook: {0}")]
    Spawn(#[from] std::io::Error),

    /// The hook exited with a non-zero status.
    #[error("hook exited with code {}", code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    Failed { code: Option<i32> },

    /// The hook exceeded its timeout and was killed.
    #[error("hook timed out after {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },
}

/// Runs one hook to completion, bounded by its timeout.
///
/// The hook's stdout/stderr are inherited into the service log rather than
/// captured; hooks are operator scripts, not tool output.
pub async fn run_hook(hook: &Hook) -> Result<(), HookError> {
    debug!(command = %hook.command, timeout_secs = hook.timeout.as_secs(), "Running hook");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&hook.command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let status = match tokio::time::timeout(hook.timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            warn!(command = %hook.command, "Hook timed out, killing");
            let _ = child.kill().await;
            return Err(HookError::TimedOut {
                timeout_secs: hook.timeout.as_secs(),
            });
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(HookError::Failed {
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hook(command: &str, timeout: Duration) -> Hook {
        Hook {
            command: command.to_string(),
            timeout,
            continue_on_failure: false,
        }
    }

    #[tokio::test]
    async fn successful_hook() {
        let result = run_hook(&hook("true", Duration::from_secs(5))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failing_hook_reports_code() {
        let result = run_hook(&hook("exit 3", Duration::from_secs(5))).await;
        match result {
            Err(HookError::Failed { code }) => assert_eq!(code, Some(3)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_hook_times_out() {
        let result = run_hook(&hook("sleep 30", Duration::from_millis(100))).await;
        assert!(matches!(result, Err(HookError::TimedOut { .. })));
    }
}
