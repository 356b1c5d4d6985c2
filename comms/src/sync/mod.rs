//! Concurrency primitives shared by every node.

mod barrier;
mod pool;

pub use barrier::Barrier;
pub use pool::{SerialExecutor, WorkerPool};
