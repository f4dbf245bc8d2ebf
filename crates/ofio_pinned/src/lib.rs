#![doc = include_str!("../README.md")]

use std::{
    alloc,
    collections::HashMap,
    slice,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
};

use ofio_core::{OffloadError, Result, TransferBuffer, DEVICE_ALIGNMENT};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// The allocation itself: aligned storage that has been `mlock`ed.
///
/// Only dropped when the last `PinnedBuffer` handle and the manager have both
/// let go, so a region can never be unpinned underneath an in-flight
/// operation that still holds a clone.
#[derive(Debug)]
struct PinnedRegion {
    ptr: *mut u8,
    /// Length requested by the caller, in bytes.
    len: usize,
    layout: alloc::Layout,
}

// The raw pointer is only ever dereferenced through the slice helpers and the
// engine's disjoint sub-range writes.
unsafe impl Send for PinnedRegion {}
unsafe impl Sync for PinnedRegion {}

impl PinnedRegion {
    fn new(len: usize) -> Result<Self> {
        let layout = alloc::Layout::from_size_align(len, DEVICE_ALIGNMENT)
            .map_err(|e| {
                OffloadError::InvalidArgument(format!("bad pinned buffer layout for {len} bytes: {e}"))
            })?
            .pad_to_align();
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(OffloadError::Allocation {
                num_bytes: layout.size(),
                source: std::io::Error::new(std::io::ErrorKind::OutOfMemory, "alloc returned null"),
            });
        }
        // Lock the whole (padded) allocation so the kernel can transfer
        // directly to/from it without the pages moving.
        let rc = unsafe { libc::mlock(ptr as *const libc::c_void, layout.size()) };
        if rc != 0 {
            let source = std::io::Error::last_os_error();
            unsafe { alloc::dealloc(ptr, layout) };
            return Err(OffloadError::Allocation {
                num_bytes: layout.size(),
                source,
            });
        }
        Ok(Self { ptr, len, layout })
    }
}

impl Drop for PinnedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munlock(self.ptr as *const libc::c_void, self.layout.size());
            alloc::dealloc(self.ptr, self.layout);
        }
    }
}

/// Handle onto one pinned allocation.
///
/// Clones share the underlying region; the region is unpinned and freed when
/// the last clone drops. The engine clones the handle into each operation
/// descriptor, which is what lets [`PinnedBufferManager::release`] detect
/// buffers that are still in flight.
#[derive(Debug, Clone)]
pub struct PinnedBuffer {
    region: Arc<PinnedRegion>,
    element_size: usize,
    id: u64,
}

impl PinnedBuffer {
    /// Number of elements the buffer was allocated for.
    pub fn num_elements(&self) -> usize {
        self.region.len / self.element_size
    }

    /// Stable identity of the underlying allocation, shared by all clones.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.region.ptr, self.region.len) }
    }

    /// Copies `src` into the buffer starting at byte `offset`.
    ///
    /// Mutation through `&self` is part of this type's contract (see
    /// [`TransferBuffer`]): the caller must not race this against an
    /// in-flight transfer on the same region.
    ///
    /// ## Panics
    /// Panics if `offset + src.len()` exceeds the buffer length.
    pub fn copy_from_slice(&self, offset: usize, src: &[u8]) {
        assert!(
            offset + src.len() <= self.region.len,
            "copy of {} bytes at offset {offset} overruns {}-byte pinned buffer",
            src.len(),
            self.region.len,
        );
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.region.ptr.add(offset), src.len());
        }
    }

    /// Fills the whole buffer with `pattern`, repeated.
    pub fn fill_pattern(&self, pattern: &[u8]) {
        assert!(!pattern.is_empty());
        let mut offset = 0;
        while offset < self.region.len {
            let n = pattern.len().min(self.region.len - offset);
            self.copy_from_slice(offset, &pattern[..n]);
            offset += n;
        }
    }
}

impl TransferBuffer for PinnedBuffer {
    fn byte_len(&self) -> usize {
        self.region.len
    }

    fn element_size(&self) -> usize {
        self.element_size
    }

    fn base_ptr(&self) -> *mut u8 {
        self.region.ptr
    }
}

/// Book-keeper for every pinned buffer a handle has allocated.
///
/// `release` refuses buffers it did not allocate and buffers still referenced
/// by an incomplete operation. Teardown drops whatever is left, which unpins
/// and frees each region once its last handle is gone.
#[derive(Debug, Default)]
pub struct PinnedBufferManager {
    regions: HashMap<u64, Arc<PinnedRegion>>,
}

impl PinnedBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates and locks `num_elements * element_size` bytes of host
    /// memory, aligned for direct I/O.
    pub fn allocate(&mut self, num_elements: usize, element_size: usize) -> Result<PinnedBuffer> {
        if num_elements == 0 || element_size == 0 {
            return Err(OffloadError::InvalidArgument(format!(
                "pinned buffer must be non-empty, got {num_elements} x {element_size} bytes"
            )));
        }
        let len = num_elements
            .checked_mul(element_size)
            .ok_or_else(|| OffloadError::InvalidArgument("pinned buffer size overflows".into()))?;
        let region = Arc::new(PinnedRegion::new(len)?);
        let id = NEXT_BUFFER_ID.fetch_add(1, Relaxed);
        self.regions.insert(id, Arc::clone(&region));
        tracing::debug!(id, len, "allocated pinned buffer");
        Ok(PinnedBuffer {
            region,
            element_size,
            id,
        })
    }

    /// Releases a buffer previously handed out by [`Self::allocate`].
    ///
    /// Returns `false` when the buffer is unknown to this manager or when
    /// clones of it are still alive elsewhere (an operation referencing it
    /// has not completed, or the caller kept extra handles).
    pub fn release(&mut self, buffer: &PinnedBuffer) -> bool {
        let Some(region) = self.regions.get(&buffer.id) else {
            tracing::debug!(id = buffer.id, "release of unknown pinned buffer refused");
            return false;
        };
        // Two handles are expected here: the manager's and the caller's.
        // Anything beyond that is an in-flight reference.
        if Arc::strong_count(region) > 2 {
            tracing::debug!(id = buffer.id, "release of in-flight pinned buffer refused");
            return false;
        }
        self.regions.remove(&buffer.id);
        tracing::debug!(id = buffer.id, "released pinned buffer");
        true
    }

    /// [`Self::release`] with an error instead of a boolean, for callers
    /// that want the refusal reason as a typed `NotFound`.
    pub fn release_checked(&mut self, buffer: &PinnedBuffer) -> Result<()> {
        if self.release(buffer) {
            Ok(())
        } else {
            Err(OffloadError::NotFound(format!(
                "pinned buffer {} is unknown to this manager or still in flight",
                buffer.id
            )))
        }
    }

    /// Number of buffers currently allocated and not yet released.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
