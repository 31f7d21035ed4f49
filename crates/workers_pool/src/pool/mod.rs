//! src/pool/mod.rs
//!
//! This module implements the `ThreadPool`.
//!
//! The `ThreadPool` distributes work items over a fixed number of worker threads and
//! merges their results back into a single stream for the caller.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌────────────┐
//!                  │ Ventilator │ (optional, e.g. FixedListVentilator)
//!                  └─────┬──────┘
//!                        │ ventilate(items): item k → worker k % N
//!                        ↓
//!              [input queue 0 .. N-1]  (unbounded)
//!                        │
//!                        ↓
//!              [worker thread 0 .. N-1] ── process(item), publish(result)
//!                        │
//!                        ↓
//!              [output queue 0 .. N-1] (bounded, results_queue_size)
//!                        │
//!                        ↓
//!                 ┌─────────────┐
//!                 │   Merger    │ (round-robin, strict or relaxed)
//!                 └──────┬──────┘
//!                        ↓
//!                [shared output queue] (bounded, shared_results_queue_size)
//!                        │
//!                        ↓
//!                  get_results()
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/pool/
//! ├── mod.rs      # ThreadPool: lifecycle, ventilation, result retrieval
//! ├── config.rs   # ThreadPoolConfig, builder, and validation
//! ├── queues.rs   # Payloads, queues, stop signal, status cells, completion predicate
//! ├── unit.rs     # Worker execution loop and per-worker stats
//! ├── merger.rs   # Round-robin merger and MergeMode
//! └── thread.rs   # Thread-local worker ID
//! ```
//!
//! # Lifecycle
//! `new` → `start` → (`ventilate` / `get_results`)* → `stop` → `join`.
//! A pool is started at most once and cannot be restarted after `stop`.
//!
//! # Example Usage
//! ```ignore
//! let mut pool = ThreadPool::new(4)?;
//! pool.start(|_worker_id, publisher, _args: &()| {
//!     Ok(move |item: &WorkItem| -> anyhow::Result<()> {
//!         publisher.publish(item.get_i64("x")? * 2)?;
//!         Ok(())
//!     })
//! }, ())?;
//!
//! pool.ventilate((0..8).map(|x| WorkItem::from_single("x", x)))?;
//! loop {
//!     match pool.get_results() {
//!         Ok(value) => println!("{value}"),
//!         Err(e) if e.is_end_of_stream() => break,
//!         Err(e) => return Err(e.into()),
//!     }
//! }
//! pool.stop();
//! pool.join();
//! ```

mod config;
mod merger;
pub(crate) mod queues;
mod thread;
mod unit;

pub use config::{ThreadPoolConfig, ThreadPoolConfigBuilder};
pub use merger::MergeMode;
pub use thread::current_worker_id;
pub use unit::WorkerStats;

use crossbeam_channel::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{PoolError, Result};
use crate::item::WorkItem;
use crate::ventilator::{VentilationHandle, Ventilator};
use crate::worker::{Publisher, Worker};
use merger::RoundRobinMerger;
use queues::{Origin, Payload, PoolShared, StopSignal};
use unit::WorkerUnit;

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDiagnostics {
    /// Current depth of the shared output queue.
    pub output_queue_size: usize,
    /// Items distributed by `ventilate` so far.
    pub ventilated_items: usize,
    /// Processed markers consumed by `get_results` so far.
    pub processed_items: usize,
}

/// A fixed-size pool of worker threads with round-robin result merging.
///
/// # Thread safety:
/// - The pool is driven from a single caller thread (`get_results`, `stop`, `join`
///   take `&mut self`).
/// - Items may also be fed from other threads through a ventilator's
///   [`VentilationHandle`].
///
/// # Type parameters:
/// - `R`: Result type published by workers and returned by `get_results`.
pub struct ThreadPool<R> {
    config: ThreadPoolConfig,
    stop: StopSignal,
    shared: Option<Arc<PoolShared<R>>>,
    workers: Vec<JoinHandle<WorkerStats>>,
    merger: Option<JoinHandle<()>>,
    processed_items: usize,
    stats: Vec<WorkerStats>,
}

impl<R: Send + 'static> ThreadPool<R> {
    /// Creates an idle pool with `workers_count` workers and default settings.
    pub fn new(workers_count: usize) -> Result<Self> {
        Self::with_config(
            ThreadPoolConfig::builder()
                .workers_count(workers_count)
                .build(),
        )
    }

    /// Creates an idle pool from a full configuration.
    pub fn with_config(config: ThreadPoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stop: StopSignal::new(),
            shared: None,
            workers: Vec::new(),
            merger: None,
            processed_items: 0,
            stats: Vec::new(),
        })
    }

    pub fn config(&self) -> &ThreadPoolConfig {
        &self.config
    }

    pub fn workers_count(&self) -> usize {
        self.config.workers_count
    }

    /// Starts the worker threads and the merger. Items are supplied through
    /// [`ventilate`](Self::ventilate).
    ///
    /// `factory` is called once per worker id with that worker's [`Publisher`] and a
    /// reference to `args`.
    pub fn start<W, F, A>(&mut self, factory: F, args: A) -> Result<()>
    where
        W: Worker,
        F: FnMut(usize, Publisher<R>, &A) -> anyhow::Result<W>,
    {
        self.launch(factory, args, None)
    }

    /// Like [`start`](Self::start), then starts `ventilator` once every worker is
    /// running.
    pub fn start_with_ventilator<W, F, A>(
        &mut self,
        factory: F,
        args: A,
        ventilator: Arc<dyn Ventilator>,
    ) -> Result<()>
    where
        W: Worker,
        F: FnMut(usize, Publisher<R>, &A) -> anyhow::Result<W>,
    {
        self.launch(factory, args, Some(ventilator))
    }

    fn launch<W, F, A>(
        &mut self,
        mut factory: F,
        args: A,
        ventilator: Option<Arc<dyn Ventilator>>,
    ) -> Result<()>
    where
        W: Worker,
        F: FnMut(usize, Publisher<R>, &A) -> anyhow::Result<W>,
    {
        // Verify stop first: a stopped pool can never be reused.
        if self.stop.is_set() {
            return Err(PoolError::AlreadyStopped {
                workers_count: self.workers_count(),
            });
        }
        if self.shared.is_some() {
            return Err(PoolError::AlreadyStarted);
        }

        let workers_count = self.workers_count();
        let io_timeout = self.config.io_timeout;
        let (shared, output_txs, shared_tx) = PoolShared::allocate(
            workers_count,
            self.config.results_queue_size,
            self.config.shared_results_queue_size,
            self.stop.clone(),
            ventilator.clone(),
        );
        let shared = Arc::new(shared);

        // Build every worker before spawning any thread, so a failing factory leaves
        // nothing running.
        let mut units = Vec::with_capacity(workers_count);
        for (worker_id, output_tx) in output_txs.into_iter().enumerate() {
            let publisher = Publisher::new(worker_id, output_tx, self.stop.clone(), io_timeout);
            let worker = factory(worker_id, publisher.clone(), &args)
                .map_err(|source| PoolError::WorkerSetup { worker_id, source })?;
            units.push(WorkerUnit::new(
                worker_id,
                worker,
                publisher,
                Arc::clone(&shared),
                io_timeout,
            ));
        }

        for unit in units {
            let name = format!("pool-worker-{}", unit.worker_id());
            let spawned = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || unit.run());
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(source) => {
                    self.abort_launch();
                    return Err(PoolError::Spawn { name, source });
                }
            }
        }

        let mode = self.config.merge_mode();
        let merger = RoundRobinMerger::new(
            Arc::clone(&shared),
            shared_tx,
            mode,
            self.config.strict_merge_timeout,
            io_timeout,
        );
        let name = "pool-merger".to_string();
        match std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || merger.run())
        {
            Ok(handle) => self.merger = Some(handle),
            Err(source) => {
                self.abort_launch();
                return Err(PoolError::Spawn { name, source });
            }
        }

        let inputs = Arc::clone(&shared.inputs);
        self.shared = Some(shared);
        info!(workers_count, %mode, "thread pool started");

        // Workers must be ready to receive before ventilation begins.
        if let Some(ventilator) = ventilator {
            if let Err(err) = ventilator.start(VentilationHandle::new(inputs)) {
                self.stop();
                self.join();
                return Err(err);
            }
        }
        Ok(())
    }

    fn abort_launch(&mut self) {
        self.stop.set();
        self.join();
    }

    /// Sends items to the workers: the k-th item of this call goes to worker `k % N`.
    ///
    /// Never blocks; the input queues are unbounded.
    pub fn ventilate<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let shared = self.shared.as_ref().ok_or(PoolError::NotStarted)?;
        shared.inputs.ventilate(items, Origin::Caller);
        Ok(())
    }

    /// Returns the next result, blocking until one is available.
    ///
    /// - `Err(PoolError::EmptyResults)` once the pool is complete (or stopped).
    /// - `Err(PoolError::WorkerFailed { .. })` if a worker failed. The pool is stopped
    ///   and joined first; the failure is returned exactly once.
    pub fn get_results(&mut self) -> Result<R> {
        let shared = Arc::clone(self.shared.as_ref().ok_or(PoolError::NotStarted)?);
        let poll = self.config.verify_end_of_ventilation_period;

        loop {
            if self.stop.is_set() || shared.completed() {
                return Err(PoolError::EmptyResults);
            }

            match shared.shared_output.recv_timeout(poll) {
                Ok(Payload::Result(result)) => return Ok(result),
                Ok(Payload::ItemProcessed { origin }) => {
                    self.processed_items += 1;
                    if origin == Origin::Ventilator {
                        if let Some(ventilator) = &shared.ventilator {
                            ventilator.processed_item();
                        }
                    }
                }
                Ok(Payload::Failed { worker_id, error }) => {
                    warn!(worker_id, "worker failure received, stopping pool");
                    self.stop();
                    self.join();
                    return Err(PoolError::WorkerFailed {
                        worker_id,
                        source: error,
                    });
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(PoolError::EmptyResults),
            }
        }
    }

    /// Whether the pool has nothing more to deliver: every worker drained, nothing
    /// queued, and no further ventilation expected.
    pub fn completed(&self) -> bool {
        self.shared
            .as_ref()
            .map_or(true, |shared| shared.completed())
    }

    /// Requests shutdown of all pool threads. Does not wait for workers; idempotent.
    pub fn stop(&mut self) {
        if !self.stop.is_set() {
            debug!("stopping thread pool");
        }
        self.stop.set();
        if let Some(ventilator) = self.shared.as_ref().and_then(|s| s.ventilator.as_ref()) {
            ventilator.stop();
        }
    }

    /// Blocks until every pool thread has terminated.
    ///
    /// Returns immediately if the pool was already joined. Workers exit only after
    /// [`stop`](Self::stop) (or their own failure), so call `stop` first.
    pub fn join(&mut self) {
        let handles: Vec<_> = self.workers.drain(..).collect();
        for (worker_id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(stats) => self.stats.push(stats),
                Err(_) => error!(worker_id, "worker thread panicked"),
            }
        }
        if let Some(merger) = self.merger.take() {
            if merger.join().is_err() {
                error!("merger thread panicked");
            }
        }

        if self.config.profiling_enabled && !self.stats.is_empty() {
            self.log_stats();
        }
    }

    /// Like [`join`](Self::join), but gives up after `timeout`.
    pub fn join_timeout(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = self.workers.iter().all(JoinHandle::is_finished)
                && self.merger.as_ref().map_or(true, JoinHandle::is_finished);
            if finished {
                self.join();
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PoolError::JoinTimeout(timeout));
            }
            std::thread::sleep(self.config.io_timeout);
        }
    }

    /// Per-worker statistics, available after `join`.
    pub fn worker_stats(&self) -> &[WorkerStats] {
        &self.stats
    }

    /// Current depth of the shared output queue.
    pub fn results_qsize(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.shared_output.len())
    }

    pub fn diagnostics(&self) -> PoolDiagnostics {
        PoolDiagnostics {
            output_queue_size: self.results_qsize(),
            ventilated_items: self
                .shared
                .as_ref()
                .map_or(0, |shared| shared.inputs.ventilated()),
            processed_items: self.processed_items,
        }
    }

    fn log_stats(&self) {
        for stats in &self.stats {
            info!(
                worker_id = stats.worker_id,
                items_processed = stats.items_processed,
                items_cancelled = stats.items_cancelled,
                failures = stats.failures,
                busy_ms = stats.busy_time.as_millis() as u64,
                "worker profile"
            );
        }
    }
}

impl<R> Drop for ThreadPool<R> {
    fn drop(&mut self) {
        // Signal shutdown to all threads
        self.stop.set();
        if let Some(ventilator) = self.shared.as_ref().and_then(|s| s.ventilator.as_ref()) {
            ventilator.stop();
        }

        // Wait for workers to finish
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(merger) = self.merger.take() {
            let _ = merger.join();
        }
    }
}
