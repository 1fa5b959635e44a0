//! Command implementations.

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strongroom::config::{config_file_path, Config};
use strongroom::engine::JobEngine;
use strongroom::job::{JobKind, JobParams, JobStatus};
use strongroom::notify::{TracingNotifier, TracingStatsPublisher};
use strongroom::repo::{Repository, StaticRegistry};
use strongroom::scheduler::{
    CheckIntervalTrigger, CronTrigger, ScheduleDefinition, ScheduleSet, StatsRefreshTrigger,
    Trigger,
};
use strongroom::secrets::StaticSecretStore;
use strongroom::store::{JobStore, JsonFileStore};

/// Arguments for `strongroom run`.
#[derive(Args)]
pub struct RunArgs {
    /// Job kind: backup, restore, check, compact, prune, delete-archive
    kind: String,

    /// Repository name
    #[arg(long, default_value = "default")]
    repository: String,

    /// Repository location (path or ssh:// URL)
    #[arg(long)]
    repo_path: String,

    /// Source path for backup (repeatable)
    #[arg(long = "source")]
    sources: Vec<PathBuf>,

    /// Archive name (backup override, restore/delete target)
    #[arg(long)]
    archive: Option<String>,

    /// Target directory for restore
    #[arg(long)]
    target: Option<PathBuf>,

    /// Environment variable holding the repository passphrase
    #[arg(long)]
    passphrase_env: Option<String>,

    /// SSH private key for ssh:// repositories
    #[arg(long)]
    ssh_key: Option<PathBuf>,
}

/// Arguments for `strongroom serve`.
#[derive(Args)]
pub struct ServeArgs {
    /// Repository as name=location (repeatable)
    #[arg(long = "repository")]
    repositories: Vec<String>,

    /// Integrity-check cadence in days applied to every repository
    #[arg(long, default_value = "0")]
    check_interval_days: u32,

    /// Cron expression for scheduled backups of every repository
    #[arg(long)]
    backup_cron: Option<String>,

    /// Source path for scheduled backups (repeatable)
    #[arg(long = "source")]
    sources: Vec<PathBuf>,

    /// Environment variable holding the passphrase for all repositories
    #[arg(long)]
    passphrase_env: Option<String>,
}

/// Loads configuration from the given or default path.
pub fn load_config(path: Option<&Path>) -> Result<Config, String> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    Config::load_from(&path).map_err(|e| e.to_string())
}

fn open_store(config: &Config) -> Result<Arc<dyn JobStore>, String> {
    JsonFileStore::open(&config.store.path)
        .map(|store| Arc::new(store) as Arc<dyn JobStore>)
        .map_err(|e| e.to_string())
}

fn secret_store(
    repositories: &[String],
    passphrase_env: Option<&str>,
    ssh_key: Option<&Path>,
) -> StaticSecretStore {
    let mut secrets = StaticSecretStore::new();
    if let Some(var) = passphrase_env {
        if let Ok(passphrase) = std::env::var(var) {
            for repository in repositories {
                secrets = secrets.with_passphrase(repository.clone(), passphrase.clone());
            }
        }
    }
    if let Some(key) = ssh_key {
        for repository in repositories {
            secrets = secrets.with_rsh(repository.clone(), format!("ssh -i {}", key.display()));
        }
    }
    secrets
}

fn build_engine(
    config: &Config,
    repositories: Vec<Repository>,
    secrets: StaticSecretStore,
) -> Result<Arc<JobEngine>, String> {
    let store = open_store(config)?;
    let engine = Arc::new(JobEngine::new(
        config,
        store,
        Arc::new(StaticRegistry::new(repositories)),
        Arc::new(secrets),
        Arc::new(TracingNotifier),
    ));
    engine.start();
    Ok(engine)
}

/// Runs one job to completion, printing new log lines as they arrive.
pub async fn run_job(config: Config, args: RunArgs) -> i32 {
    let Some(kind) = JobKind::from_label(&args.kind) else {
        eprintln!(
            "error: unknown job kind '{}' (expected backup, restore, check, compact, prune or delete-archive)",
            args.kind
        );
        return 2;
    };

    let repository = Repository::new(&args.repository, &args.repo_path);
    let secrets = secret_store(
        std::slice::from_ref(&args.repository),
        args.passphrase_env.as_deref(),
        args.ssh_key.as_deref(),
    );
    let engine = match build_engine(&config, vec![repository], secrets) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    let params = JobParams {
        source_paths: args.sources,
        archive: args.archive,
        restore_target: args.target,
    };

    let mut handle = match engine.create_job(kind, &args.repository, params) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    println!("job {} started", handle.id());

    // Poll the live log while waiting for the terminal state.
    let mut offset = 0;
    let job = loop {
        if let Ok(chunk) = engine.stream_log(handle.id(), offset) {
            for line in &chunk.lines {
                println!("{line}");
            }
            offset = chunk.next_offset;
        }

        match handle.status() {
            Some(status) if status.is_terminal() => break handle.wait().await,
            _ => tokio::time::sleep(Duration::from_millis(250)).await,
        }
    };

    // Drain whatever arrived between the last poll and termination.
    if let Ok(chunk) = engine.stream_log(handle.id(), offset) {
        for line in &chunk.lines {
            println!("{line}");
        }
    }

    engine.shutdown().await;

    let Some(job) = job else {
        eprintln!("error: job row disappeared");
        return 2;
    };

    println!(
        "job {}: {}{}",
        job.id,
        job.status,
        job.error_message
            .as_deref()
            .map(|e| format!(" ({e})"))
            .unwrap_or_default()
    );

    match job.status {
        JobStatus::Completed => 0,
        JobStatus::CompletedWithWarnings => 1,
        JobStatus::Cancelled => 3,
        _ => 2,
    }
}

/// Runs the trigger loops until Ctrl-C.
pub async fn serve(config: Config, args: ServeArgs) -> i32 {
    let mut repositories = Vec::new();
    let mut names = Vec::new();
    for entry in &args.repositories {
        let Some((name, location)) = entry.split_once('=') else {
            eprintln!("error: --repository wants name=location, got '{entry}'");
            return 2;
        };
        let mut repository = Repository::new(name, location);
        repository.check_interval_days = args.check_interval_days;
        names.push(name.to_string());
        repositories.push(repository);
    }

    let registry = Arc::new(StaticRegistry::new(repositories));
    let secrets = secret_store(&names, args.passphrase_env.as_deref(), None);
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    let engine = Arc::new(JobEngine::new(
        &config,
        store,
        Arc::clone(&registry) as Arc<dyn strongroom::repo::RepositoryRegistry>,
        Arc::new(secrets),
        Arc::new(TracingNotifier),
    ));
    engine.start();

    let shutdown = engine.shutdown_token();

    if let Some(expression) = &args.backup_cron {
        let mut definition = ScheduleDefinition::new(
            "cli-backup",
            "Scheduled backup",
            JobKind::Backup,
            Trigger::Cron(expression.clone()),
            names.clone(),
        );
        definition.source_paths = args.sources.clone();

        let schedules = ScheduleSet::new();
        schedules.upsert(definition);
        let cron_trigger = CronTrigger::new(
            schedules,
            Arc::clone(&engine),
            config.scheduler.poll_interval,
        );
        engine.track(cron_trigger.run(shutdown.clone()));
    }

    let check_trigger = CheckIntervalTrigger::new(
        Arc::clone(&registry) as Arc<dyn strongroom::repo::RepositoryRegistry>,
        Arc::clone(&engine),
        config.scheduler.poll_interval,
    );
    engine.track(check_trigger.run(shutdown.clone()));

    let (_stats_tx, stats_rx) =
        tokio::sync::watch::channel(config.scheduler.stats_refresh_interval_secs);
    let stats_trigger = StatsRefreshTrigger::new(
        Arc::clone(&registry) as Arc<dyn strongroom::repo::RepositoryRegistry>,
        Arc::clone(&engine),
        Arc::new(TracingStatsPublisher),
        stats_rx,
    );
    engine.track(stats_trigger.run(shutdown.clone()));

    println!("serving {} repositories; Ctrl-C to stop", names.len());
    if tokio::signal::ctrl_c().await.is_err() {
        eprintln!("error: failed to listen for Ctrl-C");
    }

    engine.shutdown().await;
    0
}

/// Prints log directory accounting.
pub fn log_stats(config: Config) -> i32 {
    let manager = strongroom::logs::LogManager::new(config.logs);
    match manager.stats() {
        Ok(stats) => {
            println!("files:       {}", stats.file_count);
            println!("total bytes: {}", stats.total_bytes);
            let mut kinds: Vec<_> = stats.by_kind.iter().collect();
            kinds.sort_by(|a, b| a.0.cmp(b.0));
            for (kind, breakdown) in kinds {
                println!("  {kind}: {} files, {} bytes", breakdown.files, breakdown.bytes);
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

/// Runs log retention now.
pub fn log_cleanup(config: Config) -> i32 {
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    let manager = strongroom::logs::LogManager::new(config.logs);
    match manager.cleanup(store.as_ref()) {
        Ok(result) => {
            println!(
                "deleted {} files ({} by age, {} by size), freed {} bytes, {} protected",
                result.deleted_by_age + result.deleted_by_size,
                result.deleted_by_age,
                result.deleted_by_size,
                result.bytes_freed,
                result.protected_skipped,
            );
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}
