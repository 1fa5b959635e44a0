//! Strongroom CLI - command-line driver for the job engine.
//!
//! One-shot job runs with live progress, a small scheduler daemon, and log
//! directory maintenance. The HTTP layer of the full product is a separate
//! concern; this binary wires the engine the same way that layer would.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "strongroom")]
#[command(about = "Job engine for a deduplicating backup tool", long_about = None)]
#[command(version = strongroom::VERSION)]
struct Args {
    /// Path to config.ini (default: ~/.strongroom/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run a single job to completion, streaming its output
    Run(commands::RunArgs),

    /// Run the trigger loops (interval checks, stats refresh) until Ctrl-C
    Serve(commands::ServeArgs),

    /// Show log directory accounting
    LogStats,

    /// Run log retention now
    LogCleanup,
}

fn main() {
    let args = Args::parse();

    let config = match commands::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(2);
        }
    };

    let logging_guard = match strongroom::logging::init_logging(&config.logs.directory) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to initialize logging: {e}");
            process::exit(2);
        }
    };
    tracing::debug!(version = strongroom::VERSION, "CLI starting");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(2);
        }
    };

    let code = runtime.block_on(async {
        match args.command {
            CliCommand::Run(run) => commands::run_job(config, run).await,
            CliCommand::Serve(serve) => commands::serve(config, serve).await,
            CliCommand::LogStats => commands::log_stats(config),
            CliCommand::LogCleanup => commands::log_cleanup(config),
        }
    });

    // Flush the log writer before exiting.
    drop(logging_guard);
    process::exit(code);
}
