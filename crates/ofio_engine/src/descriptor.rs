use std::{
    fmt,
    ops::Range,
    os::fd::{OwnedFd, RawFd},
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex},
};

use ofio_core::{Direction, OffloadError, Result, TransferBuffer};

/// Splits `num_bytes` into `parallelism` contiguous ranges.
///
/// Boundary *i* sits at `i * num_bytes / parallelism` (integer division), so
/// the ranges are exhaustive and non-overlapping, at most one of them differs
/// in size from the rest, and the final range absorbs any remainder.
pub(crate) fn partition_bounds(num_bytes: usize, parallelism: usize) -> Vec<Range<usize>> {
    assert!(parallelism >= 1);
    (0..parallelism)
        .map(|i| {
            let start = i * num_bytes / parallelism;
            let end = if i + 1 == parallelism {
                num_bytes
            } else {
                (i + 1) * num_bytes / parallelism
            };
            start..end
        })
        .collect()
}

/// One worker's share of a transfer: partition `index` of the owning
/// descriptor. Buffer and file offsets advance together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRange {
    pub index: usize,
    pub buffer_offset: usize,
    pub file_offset: i64,
    pub len: usize,
}

struct CompletionInner {
    remaining: usize,
    succeeded: usize,
    errors: Vec<OffloadError>,
    /// The transfer's buffer reference lives here so it can be retired at
    /// the completion boundary: the moment the last sub-range reports in,
    /// before any waiter can observe completion. A pinned buffer is
    /// therefore releasable as soon as a synchronous call or `wait()`
    /// returns, with no window where a worker still pins it.
    buffer: Option<Arc<dyn TransferBuffer>>,
}

/// Tracks which sub-ranges of a descriptor have reported in. The descriptor
/// is observably complete only once every sub-range has.
struct CompletionState {
    inner: Mutex<CompletionInner>,
    all_done: Condvar,
}

/// Everything needed to build an [`IoOpDescriptor`]. Public so engines that
/// override the descriptor factory can inspect it.
pub struct DescriptorRequest {
    pub direction: Direction,
    pub buffer: Arc<dyn TransferBuffer>,
    pub fd: RawFd,
    /// Present when the engine opened the file itself (by path); closing is
    /// then tied to the descriptor's lifetime.
    pub owned_fd: Option<OwnedFd>,
    /// Diagnostic only, and the re-read source for write validation. Empty
    /// for fd targets.
    pub path: PathBuf,
    pub file_offset: i64,
    pub validate: bool,
    pub is_async: bool,
    pub parallelism: usize,
}

/// The in-memory record of one logical transfer: what to move, where, split
/// how many ways, and how far along each sub-range is.
///
/// Owned by the submitting handle until scheduled; while executing it is
/// shared (via `Arc`) with the worker bound to each of its partitions.
pub struct IoOpDescriptor {
    direction: Direction,
    fd: RawFd,
    _owned_fd: Option<OwnedFd>,
    path: PathBuf,
    file_offset: i64,
    validate: bool,
    is_async: bool,
    num_bytes: usize,
    parallelism: usize,
    state: CompletionState,
}

impl fmt::Debug for IoOpDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoOpDescriptor")
            .field("direction", &self.direction)
            .field("path", &self.path)
            .field("file_offset", &self.file_offset)
            .field("num_bytes", &self.num_bytes)
            .field("parallelism", &self.parallelism)
            .field("is_async", &self.is_async)
            .finish()
    }
}

impl IoOpDescriptor {
    pub fn new(request: DescriptorRequest) -> Self {
        let num_bytes = request.buffer.byte_len();
        Self {
            direction: request.direction,
            fd: request.fd,
            _owned_fd: request.owned_fd,
            path: request.path,
            file_offset: request.file_offset,
            validate: request.validate,
            is_async: request.is_async,
            num_bytes,
            parallelism: request.parallelism,
            state: CompletionState {
                inner: Mutex::new(CompletionInner {
                    remaining: request.parallelism,
                    succeeded: 0,
                    errors: Vec::new(),
                    buffer: Some(request.buffer),
                }),
                all_done: Condvar::new(),
            },
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_bytes(&self) -> usize {
        self.num_bytes
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn validate(&self) -> bool {
        self.validate
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// The transfer's buffer. A worker takes its own reference before
    /// executing its sub-range and drops it before reporting completion;
    /// once the descriptor has completed the reference is gone.
    pub(crate) fn buffer(&self) -> Result<Arc<dyn TransferBuffer>> {
        let inner = self.state.inner.lock().unwrap();
        inner.buffer.clone().ok_or_else(|| {
            OffloadError::Protocol("buffer accessed after descriptor completion".into())
        })
    }

    /// The sub-range assigned to partition `index`.
    pub fn sub_range(&self, index: usize) -> SubRange {
        debug_assert!(index < self.parallelism);
        let bounds = partition_bounds(self.num_bytes, self.parallelism);
        let range = &bounds[index];
        SubRange {
            index,
            buffer_offset: range.start,
            file_offset: self.file_offset + range.start as i64,
            len: range.len(),
        }
    }

    /// Records the outcome of one sub-range. Returns `true` when this was
    /// the last outstanding sub-range, i.e. the descriptor just completed.
    ///
    /// Completion also retires the descriptor's buffer reference, so a
    /// pinned buffer is already releasable by the time any waiter wakes.
    pub(crate) fn partition_complete(&self, result: Result<()>) -> bool {
        let mut inner = self.state.inner.lock().unwrap();
        debug_assert!(inner.remaining > 0);
        match result {
            Ok(()) => inner.succeeded += 1,
            Err(e) => inner.errors.push(e),
        }
        inner.remaining -= 1;
        let done = inner.remaining == 0;
        if done {
            inner.buffer = None;
        }
        drop(inner);
        if done {
            self.state.all_done.notify_all();
        }
        done
    }

    /// Blocks until every sub-range has reported in.
    pub(crate) fn wait_complete(&self) {
        let mut inner = self.state.inner.lock().unwrap();
        while inner.remaining > 0 {
            inner = self.state.all_done.wait(inner).unwrap();
        }
    }

    /// Count of fully-succeeded sub-ranges plus any sub-range errors, for a
    /// descriptor that has already completed. Errors are handed out once.
    pub(crate) fn take_outcome(&self) -> (usize, Vec<OffloadError>) {
        let mut inner = self.state.inner.lock().unwrap();
        debug_assert_eq!(inner.remaining, 0);
        (inner.succeeded, std::mem::take(&mut inner.errors))
    }
}
