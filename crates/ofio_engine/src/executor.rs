use ofio_core::{AioConfig, Direction, OffloadError, Result, TransferBuffer};

use crate::{
    aio::{AsyncIoContext, BlockCompletion, BlockRequest},
    descriptor::{IoOpDescriptor, SubRange},
    file::device_error,
};

/// Chunks `len` bytes into `block_size`-sized pieces; the final piece holds
/// whatever is left. Returns `(offset_within_range, len)` pairs.
fn chunk_bounds(len: usize, block_size: usize) -> Vec<(usize, usize)> {
    assert!(block_size > 0);
    let mut chunks = Vec::with_capacity(len.div_ceil(block_size));
    let mut offset = 0;
    while offset < len {
        let chunk_len = block_size.min(len - offset);
        chunks.push((offset, chunk_len));
        offset += chunk_len;
    }
    chunks
}

/// Builds the device requests for one sub-range. The request id is the chunk
/// index, which is how completions are matched back to their expected
/// lengths.
fn block_requests(
    desc: &IoOpDescriptor,
    buffer: &dyn TransferBuffer,
    range: &SubRange,
    block_size: usize,
) -> Vec<BlockRequest> {
    let base = buffer.base_ptr();
    chunk_bounds(range.len, block_size)
        .into_iter()
        .enumerate()
        .map(|(id, (offset, len))| BlockRequest {
            direction: desc.direction(),
            fd: desc.fd(),
            addr: unsafe { base.add(range.buffer_offset + offset) },
            len,
            offset: range.file_offset as u64 + offset as u64,
            id: id as u64,
        })
        .collect()
}

fn check_completion(
    desc: &IoOpDescriptor,
    requests: &[BlockRequest],
    completion: &BlockCompletion,
) -> Result<()> {
    let request = &requests[completion.id as usize];
    if completion.result < 0 {
        let errno = std::io::Error::from_raw_os_error(-completion.result);
        return Err(device_error(
            desc.direction(),
            desc.path(),
            format!(
                "block {} at file offset {} failed: {errno}",
                completion.id, request.offset
            ),
        ));
    }
    let transferred = completion.result as usize;
    if transferred != request.len {
        return Err(device_error(
            desc.direction(),
            desc.path(),
            format!(
                "short transfer on block {} at file offset {}: expected {} bytes, device moved {transferred}",
                completion.id, request.offset, request.len
            ),
        ));
    }
    Ok(())
}

/// Runs one sub-range of `desc` to completion on `ctx`, honouring the
/// configured submission policy. Every submitted request is reaped before
/// this returns, even on error, so the buffer is never left with the kernel
/// still writing into it.
pub(crate) fn execute_sub_range(
    ctx: &mut AsyncIoContext,
    desc: &IoOpDescriptor,
    buffer: &dyn TransferBuffer,
    range: &SubRange,
    config: &AioConfig,
) -> Result<()> {
    if range.len == 0 {
        return Ok(());
    }
    let requests = block_requests(desc, buffer, range, config.block_size());
    tracing::trace!(
        direction = desc.direction().as_str(),
        partition = range.index,
        len = range.len,
        n_blocks = requests.len(),
        "executing sub-range"
    );
    if config.single_submit() {
        run_single_submit(ctx, desc, &requests)
    } else if config.overlap_events() {
        run_pipelined(ctx, desc, &requests)
    } else {
        run_batched(ctx, desc, &requests)
    }
}

/// One request at a time: submit, wait, check, repeat. Lowest queue
/// occupancy, highest latency.
fn run_single_submit(
    ctx: &mut AsyncIoContext,
    desc: &IoOpDescriptor,
    requests: &[BlockRequest],
) -> Result<()> {
    for request in requests {
        ctx.submit(request)?;
        let completion = ctx.wait_one()?;
        check_completion(desc, requests, &completion)?;
    }
    Ok(())
}

/// Strictly alternating phases: fill the queue up to its depth, then drain
/// it completely, then fill again.
fn run_batched(
    ctx: &mut AsyncIoContext,
    desc: &IoOpDescriptor,
    requests: &[BlockRequest],
) -> Result<()> {
    let mut first_error: Option<OffloadError> = None;
    let mut next = 0;
    while next < requests.len() {
        while next < requests.len() && ctx.has_capacity() {
            if let Err(e) = ctx.submit(&requests[next]) {
                let _ = ctx.wait_all_pending();
                return Err(e);
            }
            next += 1;
        }
        for completion in ctx.wait_all_pending()? {
            if let Err(e) = check_completion(desc, requests, &completion) {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Pipelined: keep the queue topped up while reaping completions as they
/// arrive, overlapping submission with completion polling.
fn run_pipelined(
    ctx: &mut AsyncIoContext,
    desc: &IoOpDescriptor,
    requests: &[BlockRequest],
) -> Result<()> {
    let mut first_error: Option<OffloadError> = None;
    let mut next = 0;
    while next < requests.len() || ctx.in_flight() > 0 {
        while next < requests.len() && ctx.has_capacity() {
            if let Err(e) = ctx.submit(&requests[next]) {
                let _ = ctx.wait_all_pending();
                return Err(e);
            }
            next += 1;
        }
        match ctx.wait_one() {
            Ok(completion) => {
                if let Err(e) = check_completion(desc, requests, &completion) {
                    first_error.get_or_insert(e);
                }
            }
            Err(e) => {
                let _ = ctx.wait_all_pending();
                return Err(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Post-write check under `ValidationPolicy::RereadCompare`: re-read this
/// worker's sub-range from the file and byte-compare it against the source
/// buffer.
pub(crate) fn validate_write(
    desc: &IoOpDescriptor,
    buffer: &dyn TransferBuffer,
    range: &SubRange,
) -> Result<()> {
    use std::os::unix::fs::FileExt;
    let file = std::fs::File::open(desc.path()).map_err(|e| {
        device_error(
            Direction::Read,
            desc.path(),
            format!("validation re-read open failed: {e}"),
        )
    })?;
    let mut scratch = vec![0u8; range.len];
    file.read_exact_at(&mut scratch, range.file_offset as u64)
        .map_err(|e| {
            device_error(
                Direction::Read,
                desc.path(),
                format!("validation re-read failed: {e}"),
            )
        })?;
    // Only the worker that owns this sub-range touches these bytes while
    // the transfer is in flight (the TransferBuffer aliasing contract).
    let source = unsafe {
        std::slice::from_raw_parts(buffer.base_ptr().add(range.buffer_offset), range.len)
    };
    if scratch != source {
        let first_bad = scratch
            .iter()
            .zip(source)
            .position(|(a, b)| a != b)
            .unwrap_or(0);
        return Err(OffloadError::ValidationMismatch {
            path: desc.path().to_path_buf(),
            detail: format!(
                "sub-range {} ({} bytes at file offset {}) differs from source starting at byte {first_bad}",
                range.index, range.len, range.file_offset
            ),
        });
    }
    Ok(())
}
