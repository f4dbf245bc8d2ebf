use std::os::fd::RawFd;

use io_uring::{opcode, types, IoUring};
use ofio_core::{Direction, OffloadError, Result};

/// One fixed-size device request: transfer `len` bytes between `addr` and
/// file offset `offset`. `id` comes back in the matching completion.
#[derive(Debug)]
pub(crate) struct BlockRequest {
    pub(crate) direction: Direction,
    pub(crate) fd: RawFd,
    pub(crate) addr: *mut u8,
    pub(crate) len: usize,
    pub(crate) offset: u64,
    pub(crate) id: u64,
}

#[derive(Debug)]
pub(crate) struct BlockCompletion {
    pub(crate) id: u64,
    /// Raw device result: bytes transferred if non-negative, negated errno
    /// otherwise.
    pub(crate) result: i32,
}

/// Thin wrapper around one kernel async-I/O queue (io_uring) with a fixed
/// queue depth. One context per worker thread; never shared.
///
/// This is the external dependency boundary: the engine only ever asks it to
/// submit a block request, wait for one completion, or wait for everything
/// in flight.
pub(crate) struct AsyncIoContext {
    ring: IoUring,
    queue_depth: usize,
    in_flight: usize,
}

impl AsyncIoContext {
    pub(crate) fn new(queue_depth: usize) -> Result<Self> {
        // io_uring wants a power-of-two ring size.
        let entries = queue_depth.next_power_of_two() as u32;
        let ring = IoUring::new(entries).map_err(|e| {
            OffloadError::Protocol(format!("failed to set up io_uring ({entries} entries): {e}"))
        })?;
        Ok(Self {
            ring,
            queue_depth,
            in_flight: 0,
        })
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.in_flight < self.queue_depth
    }

    /// Pushes one request to the kernel. The caller is responsible for
    /// staying within the queue depth via [`Self::has_capacity`].
    pub(crate) fn submit(&mut self, request: &BlockRequest) -> Result<u64> {
        debug_assert!(self.has_capacity());
        let entry = match request.direction {
            Direction::Read => {
                opcode::Read::new(types::Fd(request.fd), request.addr, request.len as u32)
                    .offset(request.offset)
                    .build()
                    .user_data(request.id)
            }
            Direction::Write => opcode::Write::new(
                types::Fd(request.fd),
                request.addr as *const u8,
                request.len as u32,
            )
            .offset(request.offset)
            .build()
            .user_data(request.id),
        };
        unsafe { self.ring.submission().push(&entry) }.map_err(|e| {
            OffloadError::Protocol(format!("io_uring submission queue rejected entry: {e}"))
        })?;
        self.ring
            .submit()
            .map_err(|e| OffloadError::Protocol(format!("io_uring submit failed: {e}")))?;
        self.in_flight += 1;
        Ok(request.id)
    }

    /// Blocks until one completion is available and returns it.
    pub(crate) fn wait_one(&mut self) -> Result<BlockCompletion> {
        if self.in_flight == 0 {
            return Err(OffloadError::Protocol(
                "wait_one called with no requests in flight".into(),
            ));
        }
        loop {
            if let Some(cqe) = self.ring.completion().next() {
                self.in_flight -= 1;
                return Ok(BlockCompletion {
                    id: cqe.user_data(),
                    result: cqe.result(),
                });
            }
            self.ring
                .submit_and_wait(1)
                .map_err(|e| OffloadError::Protocol(format!("io_uring wait failed: {e}")))?;
        }
    }

    /// Blocks until every in-flight request has completed.
    pub(crate) fn wait_all_pending(&mut self) -> Result<Vec<BlockCompletion>> {
        let mut completions = Vec::with_capacity(self.in_flight);
        while self.in_flight > 0 {
            completions.push(self.wait_one()?);
        }
        Ok(completions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_one_with_nothing_in_flight_is_an_error() {
        let mut ctx = AsyncIoContext::new(4).unwrap();
        assert!(matches!(ctx.wait_one(), Err(OffloadError::Protocol(_))));
    }

    #[test]
    fn test_wait_all_pending_on_idle_context_returns_empty() {
        let mut ctx = AsyncIoContext::new(4).unwrap();
        assert!(ctx.wait_all_pending().unwrap().is_empty());
        assert_eq!(ctx.in_flight(), 0);
        assert!(ctx.has_capacity());
    }
}
