//! Strongroom - job execution and orchestration engine for a deduplicating
//! backup tool.
//!
//! The engine spawns the external tool, streams and interprets its output,
//! tracks progress, supports cooperative cancellation with bounded
//! escalation, survives service restarts without losing track of running
//! work, retries transient metadata failures, manages per-job log artifacts
//! under age/size limits, and drives cron/interval triggers that create
//! jobs automatically.
//!
//! # High-Level API
//!
//! ```ignore
//! use strongroom::config::Config;
//! use strongroom::engine::JobEngine;
//! use strongroom::job::{JobKind, JobParams};
//!
//! let engine = JobEngine::new(&config, store, registry, secrets, notifier);
//! engine.start();
//!
//! let mut handle = engine.create_job(JobKind::Backup, "main", params)?;
//! let finished = handle.wait().await;
//! ```

pub mod config;
pub mod engine;
pub mod job;
pub mod logging;
pub mod logs;
pub mod notify;
pub mod process;
pub mod progress;
pub mod repo;
pub mod retry;
pub mod scheduler;
pub mod secrets;
pub mod store;

/// Version of the strongroom library and CLI.
///
/// Synchronized across the workspace; defined in `Cargo.toml` and injected
/// at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
