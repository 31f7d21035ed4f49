//! src/ventilator.rs
//!
//! Item production for the thread pool.
//!
//! A [`Ventilator`] feeds work items into a running pool through a
//! [`VentilationHandle`]. The pool starts it last, once every worker is ready to
//! receive, and consults [`Ventilator::completed`] to decide whether more items can
//! still arrive.
//!
//! [`FixedListVentilator`] is the concrete implementation: it submits a fixed list of
//! items, a given number of times (or until stopped), on its own thread, optionally
//! reshuffling the list before every pass.
//!
//! # Shuffling
//! - Nonzero seed: a seeded `StdRng` created once, so every run reshuffles identically.
//! - No seed (or seed 0): the thread-local RNG, different on every run.
//!
//! # Flow control
//! With `max_ventilation_queue_size` set, the ventilator counts items it submitted that
//! the pool has not yet reported through [`Ventilator::processed_item`], and holds back
//! the next pass while that count plus the list length exceeds the limit. A pass always
//! goes ahead once nothing is in flight.
//!
//! `Iterations::Indefinite` without an explicit limit uses the list length, so at most
//! one pass is outstanding at a time. Finite runs are unlimited unless configured.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PoolError, Result};
use crate::item::WorkItem;
use crate::pool::queues::{InputQueues, Origin};

/// Default pause between flow-control checks.
const VENTILATION_INTERVAL: Duration = Duration::from_millis(10);

/// Handle through which a ventilator submits items to a started pool.
///
/// Cloning is cheap; every clone feeds the same queues.
#[derive(Clone)]
pub struct VentilationHandle {
    inputs: Arc<InputQueues>,
}

impl VentilationHandle {
    pub(crate) fn new(inputs: Arc<InputQueues>) -> Self {
        Self { inputs }
    }

    /// Distributes `items` round-robin over the pool's workers. Never blocks.
    ///
    /// Returns the number of items enqueued.
    pub fn ventilate<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = WorkItem>,
    {
        self.inputs.ventilate(items, Origin::Ventilator)
    }

    pub fn workers_count(&self) -> usize {
        self.inputs.workers_count()
    }
}

/// Produces work items for a [`ThreadPool`](crate::ThreadPool).
///
/// Methods take `&self`: the pool shares the ventilator with its merger thread and calls
/// into it from the caller's thread.
pub trait Ventilator: Send + Sync {
    /// Begins ventilating. The pool calls this after its workers are running.
    fn start(&self, handle: VentilationHandle) -> Result<()>;

    /// Notification that the pool finished processing one item submitted through this
    /// ventilator's handle. Items passed to `ThreadPool::ventilate` are not reported.
    fn processed_item(&self);

    /// Whether the ventilator has submitted everything it will ever submit.
    fn completed(&self) -> bool;

    /// Stops ventilating. May block until the ventilation thread exits.
    fn stop(&self);
}

/// How many passes over the item list to ventilate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Finite(usize),
    /// Keep ventilating until [`Ventilator::stop`] is called.
    Indefinite,
}

impl Iterations {
    /// A finite number of passes; fails unless `count` is positive.
    pub fn finite(count: usize) -> Result<Self> {
        let iterations = Iterations::Finite(count);
        iterations.validate()?;
        Ok(iterations)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Iterations::Finite(0) => Err(PoolError::InvalidConfig(
                "iterations must be a positive integer or indefinite".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for Iterations {
    fn default() -> Self {
        Iterations::Finite(1)
    }
}

/// State shared between the ventilator and its thread.
struct VentilationState {
    /// Working copy of the list, reshuffled in place on every pass.
    items: Mutex<Vec<WorkItem>>,
    rng: Mutex<Option<StdRng>>,
    iterations_remaining: AtomicUsize,
    stop_requested: AtomicBool,
    /// Submitted by this ventilator and not yet reported processed.
    in_flight: AtomicUsize,
}

/// Ventilates a fixed list of items on a dedicated thread.
///
/// ```ignore
/// let ventilator = Arc::new(
///     FixedListVentilator::builder(items)
///         .iterations(Iterations::finite(2)?)
///         .randomize_item_order(true)
///         .random_seed(42)
///         .build()?,
/// );
/// pool.start_with_ventilator(factory, args, ventilator.clone())?;
/// ```
pub struct FixedListVentilator {
    iterations: Iterations,
    item_count: usize,
    randomize_item_order: bool,
    max_ventilation_queue_size: Option<usize>,
    ventilation_interval: Duration,
    state: Arc<VentilationState>,
    handle: Mutex<Option<VentilationHandle>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FixedListVentilator {
    /// Ventilates `items` once, in order.
    pub fn new(items: Vec<WorkItem>) -> Result<Self> {
        Self::builder(items).build()
    }

    pub fn builder(items: Vec<WorkItem>) -> FixedListVentilatorBuilder {
        FixedListVentilatorBuilder {
            items,
            iterations: Iterations::default(),
            randomize_item_order: false,
            random_seed: None,
            max_ventilation_queue_size: None,
            ventilation_interval: VENTILATION_INTERVAL,
        }
    }

    /// Restarts ventilation from the beginning.
    ///
    /// Only allowed once [`completed`](Ventilator::completed) holds; otherwise fails with
    /// [`PoolError::ResetWhileActive`] and changes nothing.
    pub fn reset(&self) -> Result<()> {
        if !self.completed() {
            return Err(PoolError::ResetWhileActive);
        }
        let handle = lock(&self.handle).clone().ok_or(PoolError::NotStarted)?;

        if let Some(finished) = lock(&self.thread).take() {
            let _ = finished.join();
        }
        if let Iterations::Finite(count) = self.iterations {
            self.state
                .iterations_remaining
                .store(count, Ordering::SeqCst);
        }
        debug!("ventilator reset");
        self.spawn(handle)
    }

    /// Passes still to be ventilated; `None` when ventilating indefinitely.
    pub fn iterations_remaining(&self) -> Option<usize> {
        match self.iterations {
            Iterations::Finite(_) => Some(self.state.iterations_remaining.load(Ordering::SeqCst)),
            Iterations::Indefinite => None,
        }
    }

    /// Items submitted and not yet reported processed.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    fn spawn(&self, handle: VentilationHandle) -> Result<()> {
        let pass = VentilationPass {
            state: Arc::clone(&self.state),
            handle,
            iterations: self.iterations,
            randomize_item_order: self.randomize_item_order,
            max_ventilation_queue_size: self.max_ventilation_queue_size,
            ventilation_interval: self.ventilation_interval,
        };

        let name = "pool-ventilator".to_string();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || pass.run())
            .map_err(|source| PoolError::Spawn { name, source })?;

        *lock(&self.thread) = Some(thread);
        Ok(())
    }
}

impl Ventilator for FixedListVentilator {
    fn start(&self, handle: VentilationHandle) -> Result<()> {
        let mut stored = lock(&self.handle);
        if stored.is_some() {
            return Err(PoolError::AlreadyStarted);
        }
        *stored = Some(handle.clone());
        drop(stored);

        info!(
            items = self.item_count,
            iterations = ?self.iterations,
            randomize = self.randomize_item_order,
            "starting ventilation"
        );
        self.spawn(handle)
    }

    fn processed_item(&self) {
        let _ = self
            .state
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn completed(&self) -> bool {
        if self.state.stop_requested.load(Ordering::SeqCst) || self.item_count == 0 {
            return true;
        }
        match self.iterations {
            Iterations::Finite(_) => self.state.iterations_remaining.load(Ordering::SeqCst) == 0,
            Iterations::Indefinite => false,
        }
    }

    fn stop(&self) {
        self.state.stop_requested.store(true, Ordering::SeqCst);
        if let Some(thread) = lock(&self.thread).take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FixedListVentilator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for [`FixedListVentilator`].
pub struct FixedListVentilatorBuilder {
    items: Vec<WorkItem>,
    iterations: Iterations,
    randomize_item_order: bool,
    random_seed: Option<u64>,
    max_ventilation_queue_size: Option<usize>,
    ventilation_interval: Duration,
}

impl FixedListVentilatorBuilder {
    /// Number of passes over the list (default: one).
    pub fn iterations(mut self, iterations: Iterations) -> Self {
        self.iterations = iterations;
        self
    }

    /// Reshuffle the list before every pass.
    pub fn randomize_item_order(mut self, randomize: bool) -> Self {
        self.randomize_item_order = randomize;
        self
    }

    /// Seed for reproducible reshuffling. Zero means "unseeded".
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Hold back passes while more than `size` submitted items are unprocessed.
    ///
    /// Default: unlimited for finite iterations, the list length for
    /// `Iterations::Indefinite`.
    pub fn max_ventilation_queue_size(mut self, size: usize) -> Self {
        self.max_ventilation_queue_size = Some(size);
        self
    }

    /// Pause between flow-control checks.
    pub fn ventilation_interval(mut self, interval: Duration) -> Self {
        self.ventilation_interval = interval;
        self
    }

    /// Validates the settings and builds the ventilator.
    pub fn build(self) -> Result<FixedListVentilator> {
        self.iterations.validate()?;
        if self.max_ventilation_queue_size == Some(0) {
            return Err(PoolError::InvalidConfig(
                "max_ventilation_queue_size must be greater than 0".to_string(),
            ));
        }

        let rng = match self.random_seed {
            Some(seed) if seed != 0 => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        };
        let remaining = match self.iterations {
            Iterations::Finite(count) => count,
            Iterations::Indefinite => 0,
        };
        // An indefinite run must not outpace the pool.
        let max_ventilation_queue_size = match self.iterations {
            Iterations::Indefinite => self
                .max_ventilation_queue_size
                .or(Some(self.items.len().max(1))),
            Iterations::Finite(_) => self.max_ventilation_queue_size,
        };

        Ok(FixedListVentilator {
            iterations: self.iterations,
            item_count: self.items.len(),
            randomize_item_order: self.randomize_item_order,
            max_ventilation_queue_size,
            ventilation_interval: self.ventilation_interval,
            state: Arc::new(VentilationState {
                items: Mutex::new(self.items),
                rng: Mutex::new(rng),
                iterations_remaining: AtomicUsize::new(remaining),
                stop_requested: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
            }),
            handle: Mutex::new(None),
            thread: Mutex::new(None),
        })
    }
}

/// Everything the ventilation thread needs.
struct VentilationPass {
    state: Arc<VentilationState>,
    handle: VentilationHandle,
    iterations: Iterations,
    randomize_item_order: bool,
    max_ventilation_queue_size: Option<usize>,
    ventilation_interval: Duration,
}

impl VentilationPass {
    fn run(self) {
        let mut passes = 0usize;
        loop {
            if self.stopped() {
                break;
            }
            if let Iterations::Finite(_) = self.iterations {
                if self.state.iterations_remaining.load(Ordering::SeqCst) == 0 {
                    break;
                }
            }
            if !self.wait_for_room() {
                break;
            }

            let batch = self.next_batch();
            if batch.is_empty() {
                break;
            }
            self.state
                .in_flight
                .fetch_add(batch.len(), Ordering::SeqCst);
            self.handle.ventilate(batch);
            passes += 1;

            if let Iterations::Finite(_) = self.iterations {
                self.state
                    .iterations_remaining
                    .fetch_sub(1, Ordering::SeqCst);
            }
        }
        debug!(passes, "ventilation thread exiting");
    }

    fn stopped(&self) -> bool {
        self.state.stop_requested.load(Ordering::SeqCst)
    }

    /// Waits until the next pass fits under the flow-control limit. Returns false if
    /// stopped while waiting.
    fn wait_for_room(&self) -> bool {
        let Some(limit) = self.max_ventilation_queue_size else {
            return true;
        };
        let pass_len = lock(&self.state.items).len();

        loop {
            let in_flight = self.state.in_flight.load(Ordering::SeqCst);
            if in_flight == 0 || in_flight + pass_len <= limit {
                return true;
            }
            if self.stopped() {
                return false;
            }
            thread::sleep(self.ventilation_interval);
        }
    }

    /// The list for the next pass, reshuffled if requested.
    fn next_batch(&self) -> Vec<WorkItem> {
        let mut items = lock(&self.state.items);
        if self.randomize_item_order {
            match lock(&self.state.rng).as_mut() {
                Some(seeded) => items.shuffle(seeded),
                None => items.shuffle(&mut rand::rng()),
            }
        }
        items.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
