//! Job records and lifecycle state.
//!
//! A [`Job`] is the persisted record tracking one external-process execution
//! from creation to a terminal state. The job row is the single source of
//! truth for process identity and status: the runner, supervisor and log
//! manager all read and write through the store rather than holding parallel
//! state.

mod types;

pub use types::{
    Job, JobId, JobKind, JobParams, JobStats, JobStatus, ProcessIdentity, TransitionError,
};
