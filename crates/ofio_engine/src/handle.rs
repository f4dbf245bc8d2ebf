use std::{
    os::fd::{AsRawFd, RawFd},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering::AcqRel, Ordering::Acquire},
        Arc, Mutex,
    },
};

use crossbeam_channel::Receiver;
use ofio_core::{AioConfig, Direction, OffloadError, Result, TransferBuffer};
use ofio_pinned::{PinnedBuffer, PinnedBufferManager};
use ofio_threadpool::ThreadPool;

use crate::{
    aio::AsyncIoContext,
    descriptor::{DescriptorRequest, IoOpDescriptor},
    file::open_target,
    worker::AioWorker,
};

/// The I/O capability a handle exposes.
///
/// One default implementation exists ([`AioHandle`]); engines that need a
/// different descriptor flavour implement this and override
/// [`Self::create_descriptor`].
///
/// All transfer entry points validate sizes, offsets, and alignment before
/// anything is scheduled, and fail with `InvalidArgument` or
/// `MisalignedTransfer` with no side effects.
pub trait IoEngine {
    fn config(&self) -> &AioConfig;

    fn block_size(&self) -> usize {
        self.config().block_size()
    }

    fn queue_depth(&self) -> usize {
        self.config().queue_depth()
    }

    fn single_submit(&self) -> bool {
        self.config().single_submit()
    }

    fn overlap_events(&self) -> bool {
        self.config().overlap_events()
    }

    fn intra_op_parallelism(&self) -> usize {
        self.config().intra_op_parallelism()
    }

    fn alignment(&self) -> usize {
        self.config().alignment()
    }

    /// Override point for engines that construct specialised descriptors.
    fn create_descriptor(&self, request: DescriptorRequest) -> Arc<IoOpDescriptor> {
        Arc::new(IoOpDescriptor::new(request))
    }

    /// Synchronous, non-parallel read: parallelism is forced to 1 for this
    /// call. Returns the count of completed sub-ranges (1) after the
    /// transfer, and optional validation, finish.
    fn read<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        file_offset: i64,
    ) -> Result<usize>;

    /// Synchronous, non-parallel write. See [`Self::read`].
    fn write<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        file_offset: i64,
    ) -> Result<usize>;

    /// Parallel read across the configured `intra_op_parallelism`. With
    /// `is_async` false, blocks and returns the completed sub-range count;
    /// with `is_async` true, schedules and returns 0 immediately, leaving
    /// completion to [`Self::wait`].
    fn pread<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        is_async: bool,
        file_offset: i64,
    ) -> Result<usize>;

    /// Parallel write. See [`Self::pread`].
    fn pwrite<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        is_async: bool,
        file_offset: i64,
    ) -> Result<usize>;

    fn sync_pread<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        file_offset: i64,
    ) -> Result<usize> {
        self.pread(buffer, path, false, false, file_offset)
    }

    fn sync_pwrite<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        file_offset: i64,
    ) -> Result<usize> {
        self.pwrite(buffer, path, false, false, file_offset)
    }

    fn async_pread<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        file_offset: i64,
    ) -> Result<usize> {
        self.pread(buffer, path, false, true, file_offset)
    }

    fn async_pwrite<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        file_offset: i64,
    ) -> Result<usize> {
        self.pwrite(buffer, path, false, true, file_offset)
    }

    /// Asynchronous parallel write through an already-open file descriptor.
    /// The caller keeps `fd` open until the next [`Self::wait`] returns.
    fn async_pwrite_fd<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        fd: RawFd,
        file_offset: i64,
    ) -> Result<usize>;

    /// Blocks until every descriptor submitted through the async entry
    /// points since the last `wait()` has completed. Returns the total
    /// completed sub-range count; returns 0 without blocking when nothing
    /// is pending. The first sub-range failure, if any, surfaces as the
    /// error.
    fn wait(&self) -> Result<usize>;
}

/// Default [`IoEngine`]: a fixed worker pool, a pinned-buffer manager, and
/// per-handle pending-operation accounting.
pub struct AioHandle {
    // Declaration order is load-bearing for Drop: the pool joins its worker
    // threads before the pinned-buffer manager frees anything they might
    // still be writing into.
    pool: ThreadPool<Arc<IoOpDescriptor>>,
    pinned: Mutex<PinnedBufferManager>,
    pending_ops: AtomicUsize,
    complete_rx: Receiver<Arc<IoOpDescriptor>>,
    config: AioConfig,
}

impl AioHandle {
    /// Fails when the kernel refuses to set up one of the per-worker rings
    /// (queue depth beyond what it will allocate, memlock limits), so a
    /// handle that constructs is a handle whose workers can all do I/O.
    pub fn new(config: AioConfig) -> Result<Self> {
        let (complete_tx, complete_rx) = crossbeam_channel::unbounded();
        let n_threads = config.intra_op_parallelism();
        let rings: Vec<_> = (0..n_threads)
            .map(|_| AsyncIoContext::new(config.queue_depth()).map(|aio| Mutex::new(Some(aio))))
            .collect::<Result<_>>()?;
        let rings = Arc::new(rings);
        let worker_config = config.clone();
        let pool = ThreadPool::new(n_threads, move |ctx| {
            // Each thread runs once and claims the ring built for its
            // partition.
            let aio = rings[ctx.partition()].lock().unwrap().take();
            if let Some(aio) = aio {
                AioWorker::new(ctx, aio, worker_config.clone(), complete_tx.clone()).run();
            }
        });
        tracing::debug!(
            intra_op_parallelism = config.intra_op_parallelism(),
            queue_depth = config.queue_depth(),
            block_size = config.block_size(),
            "constructed AioHandle"
        );
        Ok(Self {
            pool,
            pinned: Mutex::new(PinnedBufferManager::new()),
            pending_ops: AtomicUsize::new(0),
            complete_rx,
            config,
        })
    }

    /// Allocates a pinned buffer of `num_elements * element_size` bytes,
    /// owned by this handle's manager.
    pub fn new_pinned_buffer(&self, num_elements: usize, element_size: usize) -> Result<PinnedBuffer> {
        self.pinned.lock().unwrap().allocate(num_elements, element_size)
    }

    /// Releases a buffer allocated by [`Self::new_pinned_buffer`]. Returns
    /// `false` if the buffer is unknown to this handle or still referenced
    /// by an incomplete operation.
    pub fn free_pinned_buffer(&self, buffer: &PinnedBuffer) -> bool {
        self.pinned.lock().unwrap().release(buffer)
    }

    /// Count of async descriptors submitted but not yet retired by `wait()`.
    pub fn pending_ops(&self) -> usize {
        self.pending_ops.load(Acquire)
    }

    /// All argument and alignment checks run here, before any file is opened
    /// or any thread sees the operation.
    fn check_transfer(
        &self,
        buffer: &dyn TransferBuffer,
        file_offset: i64,
        parallelism: usize,
    ) -> Result<()> {
        let num_bytes = buffer.byte_len();
        if num_bytes == 0 {
            return Err(OffloadError::InvalidArgument(
                "cannot transfer an empty buffer".into(),
            ));
        }
        if file_offset < 0 {
            return Err(OffloadError::InvalidArgument(format!(
                "file offset must be non-negative, got {file_offset}"
            )));
        }
        let alignment = self.config.alignment();
        let base = buffer.base_ptr() as usize;
        if base % alignment != 0 {
            return Err(OffloadError::InvalidArgument(format!(
                "buffer base address {base:#x} is not aligned to {alignment} bytes"
            )));
        }
        if num_bytes % parallelism != 0 {
            return Err(OffloadError::InvalidArgument(format!(
                "transfer of {num_bytes} bytes is not divisible by the parallelism {parallelism}"
            )));
        }
        let block_size = self.config.block_size();
        let misaligned = num_bytes % block_size != 0
            || (file_offset as usize) % alignment != 0
            || (num_bytes / parallelism) % alignment != 0;
        if misaligned {
            return Err(OffloadError::MisalignedTransfer {
                num_bytes,
                file_offset,
                block_size,
                alignment,
            });
        }
        Ok(())
    }

    fn run_transfer<B: TransferBuffer + Clone + 'static>(
        &self,
        direction: Direction,
        buffer: &B,
        path: &Path,
        validate: bool,
        is_async: bool,
        file_offset: i64,
        parallelism: usize,
    ) -> Result<usize> {
        self.check_transfer(buffer, file_offset, parallelism)?;
        let owned_fd = open_target(path, direction)?;
        let fd = owned_fd.as_raw_fd();
        let desc = self.create_descriptor(DescriptorRequest {
            direction,
            buffer: Arc::new(buffer.clone()),
            fd,
            owned_fd: Some(owned_fd),
            path: path.to_path_buf(),
            file_offset,
            validate,
            is_async,
            parallelism,
        });
        self.dispatch(desc, is_async, parallelism)
    }

    fn dispatch(
        &self,
        desc: Arc<IoOpDescriptor>,
        is_async: bool,
        parallelism: usize,
    ) -> Result<usize> {
        tracing::debug!(descriptor = ?desc, "scheduling transfer");
        if is_async {
            self.pending_ops.fetch_add(1, AcqRel);
        }
        if parallelism == 1 {
            // Non-parallel calls always run on the partition-0 worker.
            self.pool.dispatch(0, Arc::clone(&desc));
        } else {
            debug_assert_eq!(parallelism, self.pool.n_threads());
            self.pool.dispatch_each(|_| Arc::clone(&desc));
        }
        if is_async {
            return Ok(0);
        }
        desc.wait_complete();
        let (succeeded, errors) = desc.take_outcome();
        if let Some(e) = errors.into_iter().next() {
            return Err(e);
        }
        Ok(succeeded)
    }
}

impl IoEngine for AioHandle {
    fn config(&self) -> &AioConfig {
        &self.config
    }

    fn read<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        file_offset: i64,
    ) -> Result<usize> {
        self.run_transfer(Direction::Read, buffer, path, validate, false, file_offset, 1)
    }

    fn write<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        file_offset: i64,
    ) -> Result<usize> {
        self.run_transfer(Direction::Write, buffer, path, validate, false, file_offset, 1)
    }

    fn pread<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        is_async: bool,
        file_offset: i64,
    ) -> Result<usize> {
        self.run_transfer(
            Direction::Read,
            buffer,
            path,
            validate,
            is_async,
            file_offset,
            self.config.intra_op_parallelism(),
        )
    }

    fn pwrite<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        path: &Path,
        validate: bool,
        is_async: bool,
        file_offset: i64,
    ) -> Result<usize> {
        self.run_transfer(
            Direction::Write,
            buffer,
            path,
            validate,
            is_async,
            file_offset,
            self.config.intra_op_parallelism(),
        )
    }

    fn async_pwrite_fd<B: TransferBuffer + Clone + 'static>(
        &self,
        buffer: &B,
        fd: RawFd,
        file_offset: i64,
    ) -> Result<usize> {
        let parallelism = self.config.intra_op_parallelism();
        self.check_transfer(buffer, file_offset, parallelism)?;
        let desc = self.create_descriptor(DescriptorRequest {
            direction: Direction::Write,
            buffer: Arc::new(buffer.clone()),
            fd,
            owned_fd: None,
            path: PathBuf::new(),
            file_offset,
            validate: false,
            is_async: true,
            parallelism,
        });
        self.dispatch(desc, true, parallelism)
    }

    fn wait(&self) -> Result<usize> {
        let mut completed = 0;
        let mut first_error: Option<OffloadError> = None;
        while self.pending_ops.load(Acquire) > 0 {
            let desc = self.complete_rx.recv().map_err(|_| {
                OffloadError::Protocol("worker pool stopped while operations were pending".into())
            })?;
            let (succeeded, errors) = desc.take_outcome();
            completed += succeeded;
            if first_error.is_none() {
                first_error = errors.into_iter().next();
            }
            self.pending_ops.fetch_sub(1, AcqRel);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }
}
