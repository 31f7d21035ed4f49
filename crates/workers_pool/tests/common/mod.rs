#![allow(dead_code)]

use workers_pool::{PoolError, Publisher, ThreadPool, WorkItem, Worker};

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn items(range: std::ops::Range<i64>) -> Vec<WorkItem> {
    range.map(|x| WorkItem::from_single("x", x)).collect()
}

/// Publishes `(worker_id, x)` for every item.
pub struct IdentityWorker {
    pub publisher: Publisher<(usize, i64)>,
    pub delay: Duration,
    pub drops: Option<Arc<AtomicUsize>>,
}

impl Worker for IdentityWorker {
    fn process(&mut self, item: &WorkItem) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let x = item.get_i64("x")?;
        self.publisher.publish((self.publisher.worker_id(), x))?;
        Ok(())
    }
}

impl Drop for IdentityWorker {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn identity(
    _worker_id: usize,
    publisher: Publisher<(usize, i64)>,
    _args: &(),
) -> Result<IdentityWorker> {
    Ok(IdentityWorker {
        publisher,
        delay: Duration::ZERO,
        drops: None,
    })
}

#[derive(Debug, thiserror::Error)]
#[error("value {0} is not accepted")]
pub struct ValueError(pub i64);

/// Fails with [`ValueError`] on `reject`, otherwise behaves like [`IdentityWorker`].
pub struct FailingWorker {
    pub publisher: Publisher<(usize, i64)>,
    pub reject: i64,
}

impl Worker for FailingWorker {
    fn process(&mut self, item: &WorkItem) -> Result<()> {
        let x = item.get_i64("x")?;
        if x == self.reject {
            return Err(ValueError(x).into());
        }
        self.publisher.publish((self.publisher.worker_id(), x))?;
        Ok(())
    }
}

/// Reads results until end of stream. Any other error is returned.
pub fn collect_all<R: Send + 'static>(pool: &mut ThreadPool<R>) -> Result<Vec<R>> {
    let mut results = Vec::new();
    loop {
        match pool.get_results() {
            Ok(result) => results.push(result),
            Err(PoolError::EmptyResults) => return Ok(results),
            Err(e) => return Err(e.into()),
        }
    }
}
