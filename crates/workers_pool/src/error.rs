//! src/error.rs
//!
//! Error types for the worker pool.
//!
//! Pool-level conditions are reported through [`PoolError`]. Worker implementations
//! themselves return `anyhow::Result<()>`, and a failing worker's error travels through
//! the pool as a value until it is handed back to the caller as
//! [`PoolError::WorkerFailed`].
//!
//! # Taxonomy
//! - Construction errors: [`PoolError::InvalidConfig`]
//! - Usage errors: [`PoolError::AlreadyStarted`], [`PoolError::AlreadyStopped`],
//!   [`PoolError::NotStarted`], [`PoolError::ResetWhileActive`]
//! - End of stream: [`PoolError::EmptyResults`] (not a failure)
//! - Worker failures: [`PoolError::WorkerSetup`], [`PoolError::WorkerFailed`]
//! - Thread management: [`PoolError::Spawn`], [`PoolError::JoinTimeout`]

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = PoolError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PoolError {
    /// All workers are drained, nothing is queued and nothing more will be ventilated.
    #[error("no more results: all workers are idle and nothing is left to ventilate")]
    EmptyResults,

    #[error("ThreadPool({workers_count}) cannot be reused: stop was already requested")]
    AlreadyStopped { workers_count: usize },

    #[error("thread pool was already started")]
    AlreadyStarted,

    #[error("thread pool has not been started")]
    NotStarted,

    #[error("resetting a ventilator while it is still ventilating is not supported")]
    ResetWhileActive,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker factory failed while the pool was starting.
    #[error("failed to set up worker {worker_id}: {source:#}")]
    WorkerSetup {
        worker_id: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to spawn thread '{name}'")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A worker's `process` returned an error (or panicked). Delivered once, after
    /// every worker thread has terminated.
    #[error("worker {worker_id} terminated: {source:#}")]
    WorkerFailed {
        worker_id: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("pool threads did not terminate within {0:?}")]
    JoinTimeout(Duration),
}

impl PoolError {
    /// True for the end-of-stream condition returned by `get_results`.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, PoolError::EmptyResults)
    }

    /// True for errors caused by calling the API in the wrong lifecycle state.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            PoolError::AlreadyStarted
                | PoolError::AlreadyStopped { .. }
                | PoolError::NotStarted
                | PoolError::ResetWhileActive
        )
    }
}

/// Returned by [`Publisher::publish`](crate::worker::Publisher::publish) when the pool
/// was stopped while the worker was waiting for room in its output queue.
///
/// Workers should propagate it with `?`; the execution loop recognises it and abandons
/// the current item without reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("worker termination requested while publishing a result")]
pub struct Cancelled;

/// Returns true if `err` (or anything in its context chain) is a [`Cancelled`] signal.
pub(crate) fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}
