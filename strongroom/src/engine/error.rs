//! Engine-level errors.
//!
//! Three tiers: pre-flight failures (bad references, conflicts) are
//! returned from `create_job` before any job row exists; transient
//! infrastructure and tool-reported failures surface as terminal job state,
//! never as errors that unwind the host.

use crate::job::{JobId, JobKind};
use crate::secrets::SecretError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The repository reference does not exist in the registry.
    #[error("unknown repository '{0}'")]
    UnknownRepository(String),

    /// A maintenance job of some kind is already running against the
    /// repository. At most one of check/compact/prune may run per
    /// repository at a time.
    #[error(
        "cannot start {kind}: maintenance job {conflicting} is already running for '{repository}'"
    )]
    MaintenanceConflict {
        repository: String,
        kind: JobKind,
        conflicting: JobId,
    },

    /// The operation needs a parameter the caller did not supply.
    #[error("invalid job parameters: {0}")]
    InvalidParams(String),

    /// The referenced job does not exist.
    #[error("unknown job {0}")]
    UnknownJob(JobId),

    /// Secret resolution failed.
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// Store failure other than a conflict.
    #[error(transparent)]
    Store(StoreError),

    /// Log file access failed.
    #[error("failed to read job log: {0}")]
    LogIo(#[from] std::io::Error),

    /// The engine is shutting down and accepts no new jobs.
    #[error("engine is shutting down")]
    ShuttingDown,
}
