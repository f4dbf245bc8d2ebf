use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Condvar, Mutex,
    },
};

/// One partition's work queue: an unbounded deque guarded by a monitor
/// (mutex + condition variable).
#[derive(Debug, Default)]
pub(crate) struct TaskQueue<T> {
    tasks: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, task: T) {
        self.tasks.lock().unwrap().push_back(task);
        self.available.notify_one();
    }

    /// Blocks until a task arrives or `stop` is set.
    ///
    /// Tasks already queued are drained even after `stop` is set, so a
    /// submitter blocked on a scheduled operation is never stranded by
    /// teardown; `None` means stopped *and* empty. The stop flag is
    /// re-checked after every wake to avoid lost-wakeup hangs.
    pub(crate) fn pop_blocking(&self, stop: &AtomicBool) -> Option<T> {
        let mut tasks = self.tasks.lock().unwrap();
        loop {
            if let Some(task) = tasks.pop_front() {
                return Some(task);
            }
            if stop.load(Relaxed) {
                return None;
            }
            tasks = self.available.wait(tasks).unwrap();
        }
    }

    /// Wakes every waiter so it can observe the stop flag.
    pub(crate) fn wake_all(&self) {
        self.available.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

    #[test]
    fn test_push_pop_fifo() {
        let stop = AtomicBool::new(false);
        let q = TaskQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_blocking(&stop), Some(1));
        assert_eq!(q.pop_blocking(&stop), Some(2));
    }

    #[test]
    fn test_stop_drains_queued_tasks_first() {
        let stop = AtomicBool::new(true);
        let q = TaskQueue::new();
        q.push("queued before stop");
        assert_eq!(q.pop_blocking(&stop), Some("queued before stop"));
        assert_eq!(q.pop_blocking(&stop), None);
    }
}
