//! Thread-local storage for worker identification.
//!
//! Each worker thread records its id when it starts, so worker code (and anything it
//! calls) can identify itself for logging and debugging without threading the id through
//! every call.

use std::cell::Cell;

thread_local! {
    static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Returns the id of the pool worker running on this thread, or `None` outside a worker.
pub fn current_worker_id() -> Option<usize> {
    WORKER_ID.with(Cell::get)
}

pub(crate) fn set_worker_id(worker_id: usize) {
    WORKER_ID.with(|id| id.set(Some(worker_id)));
}
