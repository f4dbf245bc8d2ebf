use std::sync::Arc;

use crossbeam_channel::Sender;
use ofio_core::{AioConfig, Direction, ValidationPolicy};
use ofio_threadpool::WorkerContext;

use crate::{
    aio::AsyncIoContext,
    descriptor::IoOpDescriptor,
    executor::{execute_sub_range, validate_write},
};

/// The body of one pool thread: pull descriptors queued for this partition,
/// execute this partition's sub-range through the thread's own io_uring
/// context, then report the outcome.
pub(crate) struct AioWorker {
    context: WorkerContext<Arc<IoOpDescriptor>>,
    aio: AsyncIoContext,
    config: AioConfig,
    complete_tx: Sender<Arc<IoOpDescriptor>>,
}

impl AioWorker {
    pub(crate) fn new(
        context: WorkerContext<Arc<IoOpDescriptor>>,
        aio: AsyncIoContext,
        config: AioConfig,
        complete_tx: Sender<Arc<IoOpDescriptor>>,
    ) -> Self {
        Self {
            context,
            aio,
            config,
            complete_tx,
        }
    }

    pub(crate) fn run(&mut self) {
        while let Some(desc) = self.context.next_task() {
            let range = desc.sub_range(self.context.partition());
            // The buffer reference is scoped to the transfer itself and
            // dropped before this partition reports in, so completion
            // leaves no worker-side reference keeping the buffer pinned.
            let result = match desc.buffer() {
                Ok(buffer) => {
                    let mut result =
                        execute_sub_range(&mut self.aio, &desc, &*buffer, &range, &self.config);
                    if result.is_ok() && self.should_validate(&desc) {
                        result = validate_write(&desc, &*buffer, &range);
                    }
                    result
                }
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::warn!(
                    partition = range.index,
                    error = %e,
                    "sub-range failed"
                );
            }
            let descriptor_complete = desc.partition_complete(result);
            // Async descriptors are retired by the handle's wait(); hand the
            // completed descriptor back on the channel. Sync submitters are
            // woken by partition_complete itself.
            if descriptor_complete && desc.is_async() {
                let _ = self.complete_tx.send(desc);
            }
        }
        tracing::debug!(partition = self.context.partition(), "worker stopping");
    }

    fn should_validate(&self, desc: &IoOpDescriptor) -> bool {
        desc.validate()
            && desc.direction() == Direction::Write
            && self.config.validation() == ValidationPolicy::RereadCompare
            && !desc.path().as_os_str().is_empty()
    }
}
