use crate::error::{OffloadError, Result};

/// Alignment required by the device for direct I/O, in bytes. Buffer
/// addresses, file offsets, and per-partition lengths must all be multiples
/// of this.
pub const DEVICE_ALIGNMENT: usize = 4096;

const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
const DEFAULT_QUEUE_DEPTH: usize = 128;

/// What "validate" means for a write request.
///
/// Reads always verify the transferred byte count against the requested
/// length; this policy only governs the extra post-write check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    /// Re-read the written region through the page cache and byte-compare
    /// it against the source buffer.
    #[default]
    RereadCompare,
    /// Skip the post-write check even when the call asks for validation.
    Disabled,
}

/// Immutable I/O configuration, fixed when a handle is constructed.
#[derive(Debug, Clone)]
pub struct AioConfig {
    block_size: usize,
    queue_depth: usize,
    single_submit: bool,
    overlap_events: bool,
    intra_op_parallelism: usize,
    validation: ValidationPolicy,
}

impl Default for AioConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            single_submit: false,
            overlap_events: false,
            intra_op_parallelism: 1,
            validation: ValidationPolicy::default(),
        }
    }
}

impl AioConfig {
    pub fn new(
        block_size: usize,
        queue_depth: usize,
        single_submit: bool,
        overlap_events: bool,
        intra_op_parallelism: usize,
    ) -> Result<Self> {
        if intra_op_parallelism < 1 {
            return Err(OffloadError::InvalidArgument(format!(
                "intra_op_parallelism must be >= 1, got {intra_op_parallelism}"
            )));
        }
        if queue_depth < 1 {
            return Err(OffloadError::InvalidArgument(format!(
                "queue_depth must be >= 1, got {queue_depth}"
            )));
        }
        if block_size == 0 || block_size % DEVICE_ALIGNMENT != 0 {
            return Err(OffloadError::InvalidArgument(format!(
                "block_size must be a non-zero multiple of {DEVICE_ALIGNMENT}, got {block_size}"
            )));
        }
        Ok(Self {
            block_size,
            queue_depth,
            single_submit,
            overlap_events,
            intra_op_parallelism,
            validation: ValidationPolicy::default(),
        })
    }

    /// Replaces the write-validation policy. See [`ValidationPolicy`].
    pub fn with_validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    pub fn single_submit(&self) -> bool {
        self.single_submit
    }

    pub fn overlap_events(&self) -> bool {
        self.overlap_events
    }

    pub fn intra_op_parallelism(&self) -> usize {
        self.intra_op_parallelism
    }

    pub fn validation(&self) -> ValidationPolicy {
        self.validation
    }

    /// Minimum alignment required of buffer addresses and file offsets for
    /// direct I/O with this configuration.
    pub fn alignment(&self) -> usize {
        DEVICE_ALIGNMENT
    }
}
