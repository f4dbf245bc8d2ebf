use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    Arc,
};

use crate::queue::TaskQueue;

/// Everything one worker thread needs: its partition index, its own queue,
/// and the shared stop flag.
///
/// This object doesn't implement the worker loop itself. The user of
/// [`crate::ThreadPool`] writes the loop and calls [`Self::next_task`] at
/// the top of it; `None` means the pool is shutting down and the loop should
/// exit.
pub struct WorkerContext<T> {
    partition: usize,
    queue: Arc<TaskQueue<T>>,
    stop: Arc<AtomicBool>,
}

impl<T> WorkerContext<T> {
    pub(crate) fn new(partition: usize, queue: Arc<TaskQueue<T>>, stop: Arc<AtomicBool>) -> Self {
        Self {
            partition,
            queue,
            stop,
        }
    }

    /// The partition index this thread is permanently bound to.
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn keep_running(&self) -> bool {
        !self.stop.load(Relaxed)
    }

    /// Blocks until a task is queued for this partition, or the pool stops.
    pub fn next_task(&self) -> Option<T> {
        self.queue.pop_blocking(&self.stop)
    }
}
