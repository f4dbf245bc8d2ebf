/// The three facts the engine needs about a memory region before it will
/// move it: how long it is, how wide its elements are, and where it starts.
///
/// The engine never interprets the element type; `element_size` exists only
/// so element-count APIs can be converted to byte counts. Implementations
/// must point at contiguous memory that stays valid (and is not reallocated)
/// for as long as any operation referencing the buffer is incomplete.
///
/// Workers write to disjoint sub-ranges of the region through the raw
/// pointer, so mutation happens behind a shared reference. That is the
/// documented contract of this trait, not an accident: a buffer handed to a
/// transfer must not be concurrently read or written by the caller until the
/// operation completes.
pub trait TransferBuffer: Send + Sync {
    /// Total length of the region in bytes.
    fn byte_len(&self) -> usize;

    /// Width of one element in bytes.
    fn element_size(&self) -> usize;

    /// Base address of the region.
    fn base_ptr(&self) -> *mut u8;
}
