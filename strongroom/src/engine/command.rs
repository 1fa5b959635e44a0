//! Tool invocation grammar.
//!
//! Maps a job kind plus its parameters onto the external tool's command
//! line. Every invocation gets the structured-output and progress flags and
//! the configured lock-wait; per-repository extra flags come last so
//! operators can override.

use super::error::EngineError;
use crate::config::ToolSettings;
use crate::job::{JobKind, JobParams};
use crate::process::ToolCommand;
use crate::repo::Repository;
use chrono::Utc;
use std::collections::HashMap;

/// Generates the archive name for a backup job that did not specify one.
pub fn default_archive_name(repository: &Repository) -> String {
    format!(
        "{}-{}",
        repository.name,
        Utc::now().format("%Y-%m-%dT%H-%M-%S")
    )
}

/// Builds the full tool invocation for a job.
///
/// `archive` is the resolved archive name for kinds that address one
/// (backup target, restore/delete source).
pub fn build_command(
    settings: &ToolSettings,
    repository: &Repository,
    kind: JobKind,
    params: &JobParams,
    archive: Option<&str>,
    secret_env: HashMap<String, String>,
) -> Result<ToolCommand, EngineError> {
    let mut command = ToolCommand::new(&settings.binary).envs(secret_env);

    let common = [
        "--log-json".to_string(),
        "--progress".to_string(),
        "--lock-wait".to_string(),
        settings.lock_wait_secs.to_string(),
    ];

    let archive_ref = |archive: Option<&str>| -> Result<String, EngineError> {
        let archive = archive.ok_or_else(|| {
            EngineError::InvalidParams(format!("{kind} requires an archive name"))
        })?;
        Ok(format!("{}::{}", repository.location, archive))
    };

    command = match kind {
        JobKind::Backup => {
            if params.source_paths.is_empty() {
                return Err(EngineError::InvalidParams(
                    "backup requires at least one source path".into(),
                ));
            }
            let mut cmd = command
                .arg("create")
                .args(common)
                .arg("--json")
                .arg("--stats")
                .arg(archive_ref(archive)?);
            for path in &params.source_paths {
                cmd = cmd.arg(path.display().to_string());
            }
            cmd
        }

        JobKind::Restore => {
            let mut cmd = command.arg("extract").args(common).arg(archive_ref(archive)?);
            cmd.cwd = Some(params.restore_target.clone().ok_or_else(|| {
                EngineError::InvalidParams("restore requires a target directory".into())
            })?);
            cmd
        }

        JobKind::Check => command.arg("check").args(common).arg(repository.location.clone()),

        JobKind::Compact => command.arg("compact").args(common).arg(repository.location.clone()),

        JobKind::Prune => command
            .arg("prune")
            .args(common)
            .arg("--list")
            .arg(repository.location.clone()),

        JobKind::DeleteArchive => command.arg("delete").args(common).arg(archive_ref(archive)?),
    };

    command.args = command
        .args
        .into_iter()
        .chain(repository.extra_args.iter().cloned())
        .collect();
    Ok(command)
}

/// Builds the read-only repository metadata query used by the stats
/// trigger. No progress flags; output is a single JSON document on stdout.
pub fn build_info_command(
    settings: &ToolSettings,
    repository: &Repository,
    secret_env: HashMap<String, String>,
) -> ToolCommand {
    let mut command = ToolCommand::new(&settings.binary)
        .envs(secret_env)
        .arg("info")
        .arg("--json")
        .arg("--lock-wait")
        .arg(settings.lock_wait_secs.to_string())
        .arg(repository.location.clone());
    command.args.extend(repository.extra_args.iter().cloned());
    command
}
