use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OffloadError>;

/// Everything that can go wrong between a transfer request and its
/// completion.
///
/// Argument and alignment problems are reported before any worker thread
/// sees the operation. Device and validation failures are detected per
/// sub-range and surface at the completion boundary: the return value of a
/// synchronous call, or the next `wait()` for asynchronous ones. Nothing is
/// retried at this layer.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// A caller-supplied size, offset, or parallelism value is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transfer length or file offset violates the device/block
    /// alignment the handle was configured with.
    #[error(
        "misaligned transfer: {num_bytes} bytes at file offset {file_offset} \
         (block size {block_size}, device alignment {alignment})"
    )]
    MisalignedTransfer {
        num_bytes: usize,
        file_offset: i64,
        block_size: usize,
        alignment: usize,
    },

    /// The platform refused to allocate or lock pinned host memory.
    #[error("failed to allocate {num_bytes} bytes of pinned memory: {source}")]
    Allocation {
        num_bytes: usize,
        #[source]
        source: std::io::Error,
    },

    /// The device reported a failure or a short transfer.
    #[error("device I/O error ({direction}) on {path:?}: {detail}")]
    DeviceIo {
        direction: &'static str,
        path: PathBuf,
        detail: String,
    },

    /// A post-transfer check found the file contents and the source buffer
    /// disagree.
    #[error("validation mismatch on {path:?}: {detail}")]
    ValidationMismatch { path: PathBuf, detail: String },

    /// Release of a pinned buffer this manager never allocated, or that is
    /// still referenced by an incomplete operation.
    #[error("not found: {0}")]
    NotFound(String),

    /// The handle was used in a way its lifecycle forbids.
    #[error("protocol violation: {0}")]
    Protocol(String),
}
