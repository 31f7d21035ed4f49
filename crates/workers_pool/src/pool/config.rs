//! src/pool/config.rs
//!
//! Configuration for ThreadPool behaviour
//!
//! Example:
//! ```ignore
//! let config = ThreadPoolConfig::builder()
//!     .workers_count(4)
//!     .results_queue_size(5)
//!     .shuffle_rows(true)
//!     .seed(42)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `results_queue_size`: Larger per-worker queues let fast workers run further ahead
//!                         of the merger, at the cost of memory.
//! - `shared_results_queue_size`: The only backpressure point between the pool and
//!                                the caller.
//! - `io_timeout`: Polling interval for stop checks. Lower values shut down faster but
//!                 wake threads more often.

use std::time::Duration;

use super::merger::MergeMode;
use crate::error::{PoolError, Result};

/// Configuration for ThreadPool
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads (must be > 0)
    pub workers_count: usize,
    /// Capacity of each worker's output queue
    pub results_queue_size: usize,
    /// Capacity of the shared output queue the caller reads from
    pub shared_results_queue_size: usize,
    /// Whether items are ventilated in randomized order. Together with `seed`
    /// this selects the merge mode.
    pub shuffle_rows: bool,
    /// Seed used for reproducible ordering. `None` or `Some(0)` means "not reproducible".
    pub seed: Option<u64>,
    /// How often blocked workers re-check the stop signal. Default: 1ms.
    pub io_timeout: Duration,
    /// How long `get_results` waits on the shared queue before re-checking
    /// completion. Default: 100ms.
    pub verify_end_of_ventilation_period: Duration,
    /// How long the merger waits on one worker in strict mode before moving on.
    /// Default: 5s.
    pub strict_merge_timeout: Duration,
    /// Log per-worker processing statistics when the pool is joined.
    pub profiling_enabled: bool,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers_count: 1,
            results_queue_size: 5,
            shared_results_queue_size: 25,
            shuffle_rows: false,
            seed: None,
            io_timeout: Duration::from_millis(1),
            verify_end_of_ventilation_period: Duration::from_millis(100),
            strict_merge_timeout: Duration::from_secs(5),
            profiling_enabled: false,
        }
    }
}

impl ThreadPoolConfig {
    pub fn builder() -> ThreadPoolConfigBuilder {
        ThreadPoolConfigBuilder::default()
    }

    /// Merge mode implied by `shuffle_rows` and `seed`.
    pub fn merge_mode(&self) -> MergeMode {
        MergeMode::select(self.shuffle_rows, self.seed)
    }

    /// Checks the configuration, failing on zero workers, capacities or timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.workers_count == 0 {
            return Err(PoolError::InvalidConfig(
                "workers_count must be greater than 0".to_string(),
            ));
        }
        if self.results_queue_size == 0 || self.shared_results_queue_size == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "queue sizes must be greater than 0 (results_queue_size = {}, \
                 shared_results_queue_size = {})",
                self.results_queue_size, self.shared_results_queue_size
            )));
        }
        if self.io_timeout.is_zero()
            || self.verify_end_of_ventilation_period.is_zero()
            || self.strict_merge_timeout.is_zero()
        {
            return Err(PoolError::InvalidConfig(
                "polling intervals and timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for ThreadPoolConfig with method chaining
#[derive(Default)]
pub struct ThreadPoolConfigBuilder {
    config: ThreadPoolConfig,
}

impl ThreadPoolConfigBuilder {
    /// Set the number of worker threads
    pub fn workers_count(mut self, workers: usize) -> Self {
        self.config.workers_count = workers;
        self
    }

    /// Set the capacity of each worker's output queue
    pub fn results_queue_size(mut self, size: usize) -> Self {
        self.config.results_queue_size = size;
        self
    }

    /// Set the capacity of the shared output queue
    pub fn shared_results_queue_size(mut self, size: usize) -> Self {
        self.config.shared_results_queue_size = size;
        self
    }

    /// Declare whether items arrive in randomized order
    pub fn shuffle_rows(mut self, shuffle: bool) -> Self {
        self.config.shuffle_rows = shuffle;
        self
    }

    /// Set the seed for reproducible ordering.
    ///
    /// A nonzero seed keeps the merger in strict round-robin mode even when rows are
    /// shuffled, so identical inputs yield identical output order.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set the stop-check polling interval for blocked threads
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Set how often `get_results` re-checks completion while waiting
    pub fn verify_end_of_ventilation_period(mut self, period: Duration) -> Self {
        self.config.verify_end_of_ventilation_period = period;
        self
    }

    /// Set the strict-mode wait per worker
    ///
    /// - Too low: slow workers get skipped and strict ordering degrades.
    /// - Too high: a stalled worker holds back results from every other worker.
    pub fn strict_merge_timeout(mut self, timeout: Duration) -> Self {
        self.config.strict_merge_timeout = timeout;
        self
    }

    /// Enable per-worker statistics logging on join
    pub fn profiling_enabled(mut self, enabled: bool) -> Self {
        self.config.profiling_enabled = enabled;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> ThreadPoolConfig {
        self.config
    }
}
