//! src/pool/unit.rs
//!
//! The worker execution unit: one thread per worker id.
//!
//! # Loop
//! 1. Exit if the stop signal is set.
//! 2. Wait up to `io_timeout` for an item. On timeout mark idle and go to 1.
//! 3. Mark busy, call `process`, publish a processed marker, mark idle.
//!
//! A [`Cancelled`](crate::error::Cancelled) coming out of step 3 abandons the item
//! silently. Any other error (or a panic inside `process`) is published as a failure
//! payload and ends the loop; the other workers keep running until the caller reacts.

use anyhow::anyhow;
use crossbeam_channel::RecvTimeoutError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use super::queues::{Assignment, Payload, PoolShared};
use super::thread::set_worker_id;
use crate::error::is_cancellation;
use crate::item::WorkItem;
use crate::worker::{Publisher, Worker};

/// Processing statistics collected by one worker thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    pub worker_id: usize,
    /// Items whose `process` call and processed marker both completed.
    pub items_processed: usize,
    /// Items abandoned because the pool was stopped mid-publish.
    pub items_cancelled: usize,
    pub failures: usize,
    /// Wall time spent inside `process` and publishing.
    pub busy_time: Duration,
}

pub(crate) struct WorkerUnit<W, R> {
    worker_id: usize,
    worker: W,
    publisher: Publisher<R>,
    shared: Arc<PoolShared<R>>,
    io_timeout: Duration,
    stats: WorkerStats,
}

impl<W, R> WorkerUnit<W, R>
where
    W: Worker,
    R: Send + 'static,
{
    pub(crate) fn new(
        worker_id: usize,
        worker: W,
        publisher: Publisher<R>,
        shared: Arc<PoolShared<R>>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            worker_id,
            worker,
            publisher,
            shared,
            io_timeout,
            stats: WorkerStats {
                worker_id,
                ..WorkerStats::default()
            },
        }
    }

    pub(crate) fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Runs the worker loop until the stop signal is set or `process` fails.
    pub(crate) fn run(mut self) -> WorkerStats {
        set_worker_id(self.worker_id);
        debug!(worker_id = self.worker_id, "worker started");

        let shared = Arc::clone(&self.shared);
        let input_rx = shared.inputs.receiver(self.worker_id);

        loop {
            // Check for stop first to prevent erroneous reuse
            if shared.stop.is_set() {
                break;
            }

            let assignment = match input_rx.recv_timeout(self.io_timeout) {
                Ok(assignment) => assignment,
                Err(RecvTimeoutError::Timeout) => {
                    shared.status.set_idle(self.worker_id);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            shared.status.set_busy(self.worker_id);
            let started = Instant::now();
            let outcome = self.handle(&assignment);
            self.stats.busy_time += started.elapsed();

            match outcome {
                Ok(()) => self.stats.items_processed += 1,
                Err(err) if is_cancellation(&err) => {
                    self.stats.items_cancelled += 1;
                    debug!(
                        worker_id = self.worker_id,
                        "stop requested while publishing, abandoning item"
                    );
                }
                Err(err) => {
                    self.stats.failures += 1;
                    error!(
                        worker_id = self.worker_id,
                        error = format!("{:#}", err),
                        "worker terminated: unexpected error"
                    );
                    self.report_failure(err);
                    shared.inputs.finish_item(self.worker_id);
                    shared.status.set_idle(self.worker_id);
                    break;
                }
            }

            shared.inputs.finish_item(self.worker_id);
            shared.status.set_idle(self.worker_id);
        }

        debug!(
            worker_id = self.worker_id,
            items_processed = self.stats.items_processed,
            "worker exiting"
        );
        self.stats
    }

    /// Processes one item and publishes its processed marker.
    fn handle(&mut self, assignment: &Assignment) -> anyhow::Result<()> {
        let worker = &mut self.worker;
        let item: &WorkItem = &assignment.item;
        match panic::catch_unwind(AssertUnwindSafe(|| worker.process(item))) {
            Ok(result) => result?,
            Err(panic) => {
                return Err(anyhow!(
                    "worker {} panicked: {}",
                    self.worker_id,
                    panic_message(panic.as_ref())
                ))
            }
        }

        self.publisher.put(Payload::ItemProcessed {
            origin: assignment.origin,
        })?;
        Ok(())
    }

    fn report_failure(&self, error: anyhow::Error) {
        let payload = Payload::Failed {
            worker_id: self.worker_id,
            error,
        };
        if self.publisher.put(payload).is_err() {
            debug!(
                worker_id = self.worker_id,
                "pool already stopping, failure not delivered"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
