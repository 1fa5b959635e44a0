//! Process spawning.
//!
//! [`ProcessRunner::spawn`] starts the external tool with a prepared
//! environment and hands back the child plus two independent line streams.
//! Output is consumed line by line — never accumulated in full — because
//! progress-heavy runs produce large volumes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

/// A fully prepared tool invocation.
///
/// The env map carries decrypted secrets; it exists only in memory and in
/// the spawned process's environment block, never on disk.
#[derive(Clone, Debug, Default)]
pub struct ToolCommand {
    /// Program to run (path or name resolved through PATH).
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl ToolCommand {
    /// Creates a command for the given program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds one environment entry.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Merges a map of environment entries.
    pub fn envs(mut self, entries: HashMap<String, String>) -> Self {
        self.env.extend(entries);
        self
    }
}

/// Spawn failures.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The OS refused to start the process.
    #[error("failed to spawn '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child started but reported no PID (already reaped).
    #[error("process exited before its pid could be recorded")]
    NoPid,

    /// The piped output streams could not be captured.
    #[error("failed to capture process output streams")]
    Stream,
}

/// A spawned tool process with its output streams.
#[derive(Debug)]
pub struct RunningTool {
    /// The child handle; owned by the supervision loop.
    pub child: Child,
    /// OS process id, valid at spawn time.
    pub pid: u32,
    /// Line stream over stdout.
    pub stdout: Lines<BufReader<ChildStdout>>,
    /// Line stream over stderr (carries the progress events).
    pub stderr: Lines<BufReader<ChildStderr>>,
}

/// Spawns tool processes.
#[derive(Clone, Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Starts the tool with piped stdout/stderr.
    ///
    /// The child is NOT killed on drop: if the service dies, the process
    /// keeps running and the orphan tracker re-verifies it by fingerprint
    /// on the next startup.
    pub fn spawn(&self, command: ToolCommand) -> Result<RunningTool, SpawnError> {
        debug!(
            program = %command.program.display(),
            args = ?command.args,
            "Spawning tool process"
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| SpawnError::Io {
            program: command.program.display().to_string(),
            source,
        })?;

        let pid = child.id().ok_or(SpawnError::NoPid)?;
        let stdout = child
            .stdout
            .take()
            .map(|out| BufReader::new(out).lines())
            .ok_or(SpawnError::Stream)?;
        let stderr = child
            .stderr
            .take()
            .map(|err| BufReader::new(err).lines())
            .ok_or(SpawnError::Stream)?;

        Ok(RunningTool {
            child,
            pid,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builder_accumulates() {
        let cmd = ToolCommand::new("borg")
            .arg("create")
            .args(["--json", "--progress"])
            .env("A", "1")
            .envs(HashMap::from([("B".to_string(), "2".to_string())]));

        assert_eq!(cmd.args, vec!["create", "--json", "--progress"]);
        assert_eq!(cmd.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(cmd.env.get("B").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn spawn_streams_stdout_and_stderr_independently() {
        let runner = ProcessRunner;
        let command = ToolCommand::new("sh")
            .arg("-c")
            .arg("echo out1; echo err1 >&2; echo out2");

        let mut tool = runner.spawn(command).unwrap();
        assert!(tool.pid > 0);

        let mut out_lines = Vec::new();
        while let Ok(Some(line)) = tool.stdout.next_line().await {
            out_lines.push(line);
        }
        let mut err_lines = Vec::new();
        while let Ok(Some(line)) = tool.stderr.next_line().await {
            err_lines.push(line);
        }

        assert_eq!(out_lines, vec!["out1", "out2"]);
        assert_eq!(err_lines, vec!["err1"]);

        let status = tool.child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn spawn_injects_environment() {
        let runner = ProcessRunner;
        let command = ToolCommand::new("sh")
            .arg("-c")
            .arg("printf '%s' \"$SECRET_MARKER\"")
            .env("SECRET_MARKER", "present");

        let mut tool = runner.spawn(command).unwrap();
        let line = tool.stdout.next_line().await.unwrap();
        assert_eq!(line.as_deref(), Some("present"));
        let _ = tool.child.wait().await;
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let runner = ProcessRunner;
        let err = runner
            .spawn(ToolCommand::new("/nonexistent/binary"))
            .unwrap_err();
        assert!(matches!(err, SpawnError::Io { .. }));
    }
}
