#![doc = include_str!("../README.md")]

pub(crate) mod aio;
pub(crate) mod descriptor;
pub(crate) mod executor;
pub(crate) mod file;
pub(crate) mod handle;
pub(crate) mod worker;

pub use descriptor::{DescriptorRequest, IoOpDescriptor, SubRange};
pub use handle::{AioHandle, IoEngine};

// Re-export the vocabulary crates so most users only need `ofio_engine`.
pub use ofio_core::{
    AioConfig, Direction, OffloadError, Result, TransferBuffer, ValidationPolicy, DEVICE_ALIGNMENT,
};
pub use ofio_pinned::{PinnedBuffer, PinnedBufferManager};
