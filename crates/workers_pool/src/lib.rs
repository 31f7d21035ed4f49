pub mod error;
pub mod item;
pub mod pool;
pub mod ventilator;
pub mod worker;

pub use error::{Cancelled, PoolError, Result};
pub use item::WorkItem;
pub use pool::{
    current_worker_id, MergeMode, PoolDiagnostics, ThreadPool, ThreadPoolConfig,
    ThreadPoolConfigBuilder, WorkerStats,
};
pub use ventilator::{
    FixedListVentilator, FixedListVentilatorBuilder, Iterations, VentilationHandle, Ventilator,
};
pub use worker::{Publisher, Worker};
