//! src/pool/merger.rs
//!
//! Round-robin merger: a single thread moving payloads from the per-worker output queues
//! into the shared output queue.
//!
//! The rotation pointer advances after every attempt, so the merger never reads the same
//! worker twice in a row. Workers that are drained are skipped without reading.
//!
//! # Modes
//! - `Strict`: wait (up to `strict_merge_timeout`) for the current worker's next payload.
//!   Given the same per-worker outputs the merged order is the same on every run.
//! - `Relaxed`: take whatever is ready right now and move on. Lower latency, no
//!   cross-worker ordering guarantee.
//!
//! When the whole pool is drained the pointer returns to worker 0, which is where the
//! next `ventilate` call starts assigning items.

use crossbeam_channel::{SendTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::queues::{Payload, PoolShared};

/// Ordering policy of the round-robin merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Blocking rotation; deterministic interleaving of worker outputs.
    Strict,
    /// Non-blocking rotation; best-effort fairness.
    Relaxed,
}

impl MergeMode {
    /// Relaxed only when rows are shuffled and no reproducibility seed was given.
    pub fn select(shuffle_rows: bool, seed: Option<u64>) -> Self {
        let reproducible = matches!(seed, Some(seed) if seed != 0);
        if shuffle_rows && !reproducible {
            MergeMode::Relaxed
        } else {
            MergeMode::Strict
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Strict => write!(f, "strict"),
            MergeMode::Relaxed => write!(f, "relaxed"),
        }
    }
}

enum Step {
    /// Everything is drained; rotation restarted at worker 0.
    Idle,
    Skip,
    Attempt(usize),
}

pub(crate) struct RoundRobinMerger<R> {
    shared: Arc<PoolShared<R>>,
    shared_tx: Sender<Payload<R>>,
    mode: MergeMode,
    strict_timeout: Duration,
    io_timeout: Duration,
    current: usize,
}

impl<R: Send + 'static> RoundRobinMerger<R> {
    pub(crate) fn new(
        shared: Arc<PoolShared<R>>,
        shared_tx: Sender<Payload<R>>,
        mode: MergeMode,
        strict_timeout: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            shared_tx,
            mode,
            strict_timeout,
            io_timeout,
            current: 0,
        }
    }

    pub(crate) fn run(mut self) {
        let workers_count = self.shared.workers_count();
        debug!(mode = %self.mode, workers_count, "round-robin merger started");

        // Attempts since something was last forwarded.
        let mut fruitless = 0usize;

        while !self.shared.stop.is_set() {
            match self.next_step() {
                Step::Idle => {
                    fruitless = 0;
                    thread::sleep(self.io_timeout);
                }
                Step::Skip => {
                    fruitless += 1;
                }
                Step::Attempt(worker_id) => {
                    if self.transfer(worker_id) {
                        fruitless = 0;
                    } else {
                        fruitless += 1;
                    }
                }
            }

            // A full rotation without progress: back off instead of spinning.
            if fruitless >= workers_count {
                fruitless = 0;
                thread::sleep(self.io_timeout);
            }
        }

        debug!("round-robin merger exiting");
    }

    /// Decides what to do with the current worker and advances the pointer.
    ///
    /// Runs under the ventilation gate so a `ventilate` batch is registered either
    /// entirely before or entirely after the decision.
    fn next_step(&mut self) -> Step {
        let _gate = self.shared.inputs.lock_gate();

        if self.shared.all_workers_done() {
            self.current = 0;
            return Step::Idle;
        }

        let worker_id = self.current;
        self.current = (self.current + 1) % self.shared.workers_count();

        if self.shared.is_worker_drained(worker_id) {
            Step::Skip
        } else {
            Step::Attempt(worker_id)
        }
    }

    /// Takes one payload from `worker_id` and forwards it. Returns true if something
    /// was forwarded.
    fn transfer(&self, worker_id: usize) -> bool {
        self.shared.merger_in_hand.store(true, Ordering::SeqCst);

        let taken = match self.mode {
            MergeMode::Strict => self.take_strict(worker_id),
            MergeMode::Relaxed => match self.shared.outputs[worker_id].try_recv() {
                Ok(payload) => Some(payload),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            },
        };

        let forwarded = match taken {
            Some(payload) => {
                trace!(worker_id, "forwarding payload");
                self.forward(payload)
            }
            None => {
                trace!(worker_id, mode = %self.mode, "nothing ready, moving on");
                false
            }
        };

        self.shared.merger_in_hand.store(false, Ordering::SeqCst);
        forwarded
    }

    /// Waits for the worker's next payload, in `io_timeout` slices so the stop signal
    /// is honoured. Gives up on timeout or once the worker turns out to be drained.
    fn take_strict(&self, worker_id: usize) -> Option<Payload<R>> {
        let output = &self.shared.outputs[worker_id];
        let deadline = Instant::now() + self.strict_timeout;

        loop {
            if let Ok(payload) = output.recv_timeout(self.io_timeout) {
                return Some(payload);
            }
            if self.shared.stop.is_set() || Instant::now() >= deadline {
                return None;
            }
            if self.shared.is_worker_drained(worker_id) {
                return None;
            }
        }
    }

    /// Blocks while the shared queue is full, re-checking the stop signal.
    fn forward(&self, mut payload: Payload<R>) -> bool {
        loop {
            match self.shared_tx.send_timeout(payload, self.io_timeout) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(rejected)) => {
                    if self.shared.stop.is_set() {
                        return false;
                    }
                    payload = rejected;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}
