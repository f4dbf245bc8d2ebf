//! A fixed pool of long-lived worker threads, one per partition index.
//!
//! Unlike a work-stealing pool, thread *i* only ever sees tasks pushed to
//! queue *i*. That determinism is load-bearing for the I/O engine: one
//! logical transfer is split into exactly `n_threads` sub-ranges, and the
//! thread bound to partition *i* always executes sub-range *i*, which keeps
//! the partition arithmetic and the completion accounting trivial.

mod pool;
mod queue;
mod worker;

pub use pool::ThreadPool;
pub use worker::WorkerContext;
