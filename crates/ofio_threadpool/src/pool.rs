use std::{
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Arc,
    },
    thread,
};

use crate::{queue::TaskQueue, worker::WorkerContext};

/// Fixed set of worker threads, created once and joined at drop.
///
/// `worker_fn` is the body of each thread; it receives the thread's
/// [`WorkerContext`] and is expected to loop on
/// [`WorkerContext::next_task`] until it returns `None`.
pub struct ThreadPool<T: Send + 'static> {
    queues: Vec<Arc<TaskQueue<T>>>,
    stop: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    pub fn new<F>(n_threads: usize, worker_fn: F) -> Self
    where
        F: Fn(WorkerContext<T>) + Clone + Send + 'static,
    {
        assert!(n_threads >= 1, "a ThreadPool needs at least one thread");
        let stop = Arc::new(AtomicBool::new(false));
        let queues: Vec<_> = (0..n_threads).map(|_| Arc::new(TaskQueue::new())).collect();
        let threads = (0..n_threads)
            .map(|partition| {
                let context = WorkerContext::new(
                    partition,
                    Arc::clone(&queues[partition]),
                    Arc::clone(&stop),
                );
                let worker_fn = worker_fn.clone();
                thread::Builder::new()
                    .name(format!("ofio-worker-{partition}"))
                    .spawn(move || worker_fn(context))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            queues,
            stop,
            threads,
        }
    }

    pub fn n_threads(&self) -> usize {
        self.queues.len()
    }

    /// Pushes one task onto a single partition's queue.
    ///
    /// ## Panics
    /// Panics if `partition` is out of range.
    pub fn dispatch(&self, partition: usize, task: T) {
        self.queues[partition].push(task);
    }

    /// Pushes one task onto every partition's queue, in partition order.
    pub fn dispatch_each(&self, mut make_task: impl FnMut(usize) -> T) {
        for (partition, queue) in self.queues.iter().enumerate() {
            queue.push(make_task(partition));
        }
    }

    /// Cooperative shutdown: raise the stop flag, wake everything, join.
    ///
    /// Tasks already queued are still drained before threads exit (see
    /// `TaskQueue::pop_blocking`), so in-flight work finishes rather than
    /// being aborted mid-transfer. Idempotent.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.stop.store(true, Relaxed);
        for queue in &self.queues {
            queue.wake_all();
        }
        tracing::debug!(n_threads = self.queues.len(), "joining worker threads");
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("a worker thread panicked before shutdown");
            }
        }
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_each_partition_sees_only_its_own_tasks() {
        const N: usize = 4;
        let (tx, rx) = mpsc::channel::<(usize, usize)>();
        let mut pool = ThreadPool::new(N, move |ctx: WorkerContext<usize>| {
            while let Some(task) = ctx.next_task() {
                tx.send((ctx.partition(), task)).unwrap();
            }
        });

        pool.dispatch_each(|partition| partition * 10);
        let mut seen: Vec<_> = (0..N).map(|_| rx.recv().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![(0, 0), (1, 10), (2, 20), (3, 30)]);

        pool.shutdown();
        // Shutdown is idempotent.
        pool.shutdown();
    }

    #[test]
    fn test_queued_tasks_survive_shutdown() {
        let (tx, rx) = mpsc::channel::<usize>();
        let mut pool = ThreadPool::new(1, move |ctx: WorkerContext<usize>| {
            while let Some(task) = ctx.next_task() {
                tx.send(task).unwrap();
            }
        });
        for task in 0..100 {
            pool.dispatch(0, task);
        }
        pool.shutdown();
        let drained: Vec<_> = rx.iter().collect();
        assert_eq!(drained, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_idle_pool_drops_without_hanging() {
        let pool = ThreadPool::new(8, |ctx: WorkerContext<()>| while ctx.next_task().is_some() {});
        assert_eq!(pool.n_threads(), 8);
        drop(pool);
    }
}
