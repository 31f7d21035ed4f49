//! src/pool/queues.rs
//!
//! Queues and shared state for the thread pool.
//!
//! ```text
//!   ventilate ──► input[0..N] (unbounded) ──► workers ──► output[0..N] (bounded, Cr)
//!                                                             │
//!                                            merger (round-robin)
//!                                                             ▼
//!                                              shared output (bounded, Cs) ──► get_results
//! ```
//!
//! Besides the queues themselves this module holds the pool-wide [`StopSignal`], the
//! per-worker busy/idle cells and the hand-off counters used by the completion predicate.
//! Nothing here takes a lock on the hot path: the queues synchronise themselves, the
//! status cells are single-writer atomics read with relaxed ordering.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

use crate::item::WorkItem;
use crate::ventilator::Ventilator;

/// Messages carried by the output queues.
pub(crate) enum Payload<R> {
    /// A value published by a worker.
    Result(R),
    /// Emitted once a worker finished processing an item.
    ItemProcessed { origin: Origin },
    /// The worker's `process` failed; the worker has terminated.
    Failed {
        worker_id: usize,
        error: anyhow::Error,
    },
}

/// Who submitted a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// `ThreadPool::ventilate`.
    Caller,
    /// An attached ventilator, through its `VentilationHandle`.
    Ventilator,
}

/// A work item on its way to a worker.
pub(crate) struct Assignment {
    pub(crate) item: WorkItem,
    pub(crate) origin: Origin,
}

/// Pool-wide cancellation flag.
///
/// Monotonic: once set it is never cleared. Every pool thread checks it at the head of
/// its loop and on each retry of a blocking operation.
#[derive(Debug, Clone, Default)]
pub(crate) struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-worker busy/idle cells.
///
/// Each cell is written only by the owning worker. Readers (merger, completion
/// predicate) may observe stale values; they re-poll, so the cells are scheduling hints
/// rather than a correctness dependency.
pub(crate) struct WorkerStatus {
    busy: Box<[AtomicBool]>,
}

impl WorkerStatus {
    pub(crate) fn new(workers_count: usize) -> Self {
        Self {
            busy: (0..workers_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub(crate) fn set_busy(&self, worker_id: usize) {
        self.busy[worker_id].store(true, Ordering::Relaxed);
    }

    pub(crate) fn set_idle(&self, worker_id: usize) {
        self.busy[worker_id].store(false, Ordering::Relaxed);
    }

    pub(crate) fn is_idle(&self, worker_id: usize) -> bool {
        !self.busy[worker_id].load(Ordering::Relaxed)
    }
}

/// The unbounded per-worker input queues plus ventilation bookkeeping.
///
/// `outstanding[i]` counts items assigned to worker `i` whose processed marker (or
/// failure) has not been published yet. It is raised before an item is enqueued and
/// lowered after the worker has published, so an item is always visible either here or
/// in the worker's output queue.
pub(crate) struct InputQueues {
    senders: Vec<Sender<Assignment>>,
    receivers: Vec<Receiver<Assignment>>,
    outstanding: Box<[AtomicUsize]>,
    ventilated: AtomicUsize,
    // Serialises batch registration against the merger's rotation decisions.
    gate: Mutex<()>,
}

impl InputQueues {
    pub(crate) fn new(workers_count: usize) -> Self {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..workers_count).map(|_| unbounded()).unzip();
        Self {
            senders,
            receivers,
            outstanding: (0..workers_count).map(|_| AtomicUsize::new(0)).collect(),
            ventilated: AtomicUsize::new(0),
            gate: Mutex::new(()),
        }
    }

    pub(crate) fn workers_count(&self) -> usize {
        self.senders.len()
    }

    /// Round-robins `items` across the input queues: the k-th item of this call goes to
    /// worker `k % N`. Never blocks on capacity.
    pub(crate) fn ventilate<I>(&self, items: I, origin: Origin) -> usize
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let workers_count = self.workers_count();
        let _gate = self.lock_gate();

        let mut count = 0;
        for (index, item) in items.into_iter().enumerate() {
            let worker_id = index % workers_count;
            self.outstanding[worker_id].fetch_add(1, Ordering::SeqCst);
            // The pool keeps a receiver for every queue, so the send cannot fail while
            // the queues exist.
            if self.senders[worker_id]
                .send(Assignment { item, origin })
                .is_err()
            {
                self.outstanding[worker_id].fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            count += 1;
        }
        self.ventilated.fetch_add(count, Ordering::Relaxed);

        trace!(items = count, ?origin, "ventilated items");
        count
    }

    pub(crate) fn receiver(&self, worker_id: usize) -> &Receiver<Assignment> {
        &self.receivers[worker_id]
    }

    pub(crate) fn is_empty(&self, worker_id: usize) -> bool {
        self.receivers[worker_id].is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self, worker_id: usize) -> usize {
        self.receivers[worker_id].len()
    }

    pub(crate) fn outstanding(&self, worker_id: usize) -> usize {
        self.outstanding[worker_id].load(Ordering::SeqCst)
    }

    /// Called by a worker once it has published everything for one item.
    pub(crate) fn finish_item(&self, worker_id: usize) {
        self.outstanding[worker_id].fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn ventilated(&self) -> usize {
        self.ventilated.load(Ordering::Relaxed)
    }

    pub(crate) fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State shared by the orchestrator, the worker units and the merger.
pub(crate) struct PoolShared<R> {
    pub(crate) stop: StopSignal,
    pub(crate) inputs: Arc<InputQueues>,
    pub(crate) outputs: Vec<Receiver<Payload<R>>>,
    pub(crate) shared_output: Receiver<Payload<R>>,
    pub(crate) status: WorkerStatus,
    pub(crate) merger_in_hand: AtomicBool,
    pub(crate) ventilator: Option<Arc<dyn Ventilator>>,
}

impl<R> PoolShared<R> {
    /// Allocates the queues for `workers_count` workers.
    ///
    /// Returns the shared state together with the sending halves the workers and the
    /// merger publish into.
    pub(crate) fn allocate(
        workers_count: usize,
        results_queue_size: usize,
        shared_results_queue_size: usize,
        stop: StopSignal,
        ventilator: Option<Arc<dyn Ventilator>>,
    ) -> (Self, Vec<Sender<Payload<R>>>, Sender<Payload<R>>) {
        let (output_txs, outputs): (Vec<_>, Vec<_>) = (0..workers_count)
            .map(|_| bounded(results_queue_size))
            .unzip();
        let (shared_tx, shared_output) = bounded(shared_results_queue_size);

        let shared = Self {
            stop,
            inputs: Arc::new(InputQueues::new(workers_count)),
            outputs,
            shared_output,
            status: WorkerStatus::new(workers_count),
            merger_in_hand: AtomicBool::new(false),
            ventilator,
        };
        (shared, output_txs, shared_tx)
    }

    pub(crate) fn workers_count(&self) -> usize {
        self.outputs.len()
    }

    /// A worker is drained when nothing is assigned to it, queued for it, or waiting in
    /// its output queue, and it reports itself idle.
    ///
    /// Stages are read upstream first so an item moving between them is never missed.
    pub(crate) fn is_worker_drained(&self, worker_id: usize) -> bool {
        self.inputs.outstanding(worker_id) == 0
            && self.inputs.is_empty(worker_id)
            && self.status.is_idle(worker_id)
            && self.outputs[worker_id].is_empty()
    }

    pub(crate) fn all_workers_done(&self) -> bool {
        (0..self.workers_count()).all(|worker_id| self.is_worker_drained(worker_id))
    }

    /// True when no ventilator is attached or the attached one reports completed.
    pub(crate) fn ventilation_finished(&self) -> bool {
        self.ventilator
            .as_ref()
            .map_or(true, |ventilator| ventilator.completed())
    }

    /// The completion predicate: nothing more to ventilate, every worker drained, the
    /// merger holds nothing and the shared output queue is empty.
    pub(crate) fn completed(&self) -> bool {
        self.ventilation_finished()
            && self.all_workers_done()
            && !self.merger_in_hand.load(Ordering::SeqCst)
            && self.shared_output.is_empty()
    }
}
