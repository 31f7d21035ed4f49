//! src/worker.rs
//!
//! The contract between the pool and user-supplied processing logic.
//!
//! A worker is built once per worker id by the factory passed to
//! [`ThreadPool::start`](crate::ThreadPool::start). It receives a [`Publisher`] bound to
//! its own output queue and is then driven by the pool: `process` is called once for
//! every item routed to that worker, and may publish any number of results.
//!
//! # Example
//! ```ignore
//! struct Squarer {
//!     publisher: Publisher<i64>,
//! }
//!
//! impl Worker for Squarer {
//!     fn process(&mut self, item: &WorkItem) -> anyhow::Result<()> {
//!         let x = item.get_i64("x")?;
//!         self.publisher.publish(x * x)?;
//!         Ok(())
//!     }
//! }
//!
//! pool.start(|_worker_id, publisher, _args: &()| Ok(Squarer { publisher }), ())?;
//! ```

use crossbeam_channel::{SendTimeoutError, Sender};
use std::time::Duration;

use crate::error::Cancelled;
use crate::item::WorkItem;
use crate::pool::queues::{Payload, StopSignal};

/// Per-item processing logic run on a pool thread.
pub trait Worker: Send + 'static {
    /// Processes one work item.
    ///
    /// Returning an error terminates this worker and stops the pool once the caller
    /// observes it. A [`Cancelled`] error (from [`Publisher::publish`]) is treated as a
    /// cooperative abort instead.
    fn process(&mut self, item: &WorkItem) -> anyhow::Result<()>;
}

impl<F> Worker for F
where
    F: FnMut(&WorkItem) -> anyhow::Result<()> + Send + 'static,
{
    fn process(&mut self, item: &WorkItem) -> anyhow::Result<()> {
        self(item)
    }
}

/// Handle a worker uses to emit results into its own output queue.
///
/// Publishing waits for room in the bounded queue, re-checking the pool's stop signal
/// every `io_timeout`, so a worker is never stuck on a full queue after `stop()`.
pub struct Publisher<R> {
    worker_id: usize,
    results_tx: Sender<Payload<R>>,
    stop: StopSignal,
    io_timeout: Duration,
}

impl<R> Clone for Publisher<R> {
    fn clone(&self) -> Self {
        Self {
            worker_id: self.worker_id,
            results_tx: self.results_tx.clone(),
            stop: self.stop.clone(),
            io_timeout: self.io_timeout,
        }
    }
}

impl<R> Publisher<R> {
    pub(crate) fn new(
        worker_id: usize,
        results_tx: Sender<Payload<R>>,
        stop: StopSignal,
        io_timeout: Duration,
    ) -> Self {
        Self {
            worker_id,
            results_tx,
            stop,
            io_timeout,
        }
    }

    /// Id of the worker this publisher belongs to.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Publishes one result.
    ///
    /// Returns [`Cancelled`] if the pool was stopped while waiting for room.
    pub fn publish(&self, result: R) -> Result<(), Cancelled> {
        self.put(Payload::Result(result))
    }

    pub(crate) fn put(&self, mut payload: Payload<R>) -> Result<(), Cancelled> {
        loop {
            match self.results_tx.send_timeout(payload, self.io_timeout) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(rejected)) => payload = rejected,
                Err(SendTimeoutError::Disconnected(_)) => return Err(Cancelled),
            }

            if self.stop.is_set() {
                return Err(Cancelled);
            }
        }
    }
}
