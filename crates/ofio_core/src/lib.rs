//! Shared vocabulary for the offload-io engine.
//!
//! This crate defines the three things every other `ofio_*` crate agrees on:
//! the immutable [`AioConfig`] fixed at handle construction, the
//! [`OffloadError`] taxonomy, and the [`TransferBuffer`] contract that any
//! memory region must satisfy before the engine will move it.

mod buffer;
mod config;
mod error;

pub use buffer::TransferBuffer;
pub use config::{AioConfig, ValidationPolicy, DEVICE_ALIGNMENT};
pub use error::{OffloadError, Result};

/// Which way the bytes flow relative to host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// File to buffer.
    Read,
    /// Buffer to file.
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}
