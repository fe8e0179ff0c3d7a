// src/bucket/processor.rs

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::types::WriteError;

/// Values threaded through every processor and batch-operation invocation.
///
/// Replaces ambient per-thread state: a worker builds one of these per
/// attempt, so a processor always knows which bucket it is serving and how
/// many attempts the current batch has consumed.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    bucket: usize,
    attempt: u32,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub(crate) fn new(bucket: usize, attempt: u32, cancel: CancellationToken) -> Self {
        ExecutionContext {
            bucket,
            attempt,
            cancel,
        }
    }

    /// Index of the bucket the current batch was drained from.
    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Attempt number for the current batch, starting at 1.
    ///
    /// Transient infrastructure failures do not advance this.
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Token cancelled when the coordinator is shutting down.
    ///
    /// Long-running writes may watch this to bail out early; the worker
    /// itself never interrupts an in-flight batch.
    #[inline]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Sink for write-behind items.
///
/// Implementations execute writes against the backing resource. Only
/// [`process`](ItemProcessor::process) is required: the default
/// [`process_batch`](ItemProcessor::process_batch) applies items one by
/// one, and the default [`discard`](ItemProcessor::discard) logs the
/// dropped item.
///
/// Processors must be idempotent: delivery is at-least-once, and a batch
/// interrupted between the backing write and queue removal is re-applied.
#[async_trait]
pub trait ItemProcessor<T: Sync>: Send + Sync {
    /// Writes a single item to the backing resource.
    async fn process(&self, ctx: &ExecutionContext, item: &T) -> Result<(), WriteError>;

    /// Writes a batch of items to the backing resource.
    ///
    /// Override this when the resource has a cheaper bulk path; an error
    /// fails the whole batch, so a partially applied prefix will be
    /// re-delivered on retry.
    async fn process_batch(&self, ctx: &ExecutionContext, items: &[T]) -> Result<(), WriteError> {
        for item in items {
            self.process(ctx, item).await?;
        }
        Ok(())
    }

    /// Called exactly once per item whose retry budget is exhausted.
    ///
    /// This is the only path by which an item is dropped without having
    /// been written; transient infrastructure failures never end up here.
    async fn discard(&self, ctx: &ExecutionContext, _item: &T, cause: &WriteError) {
        warn!(bucket = ctx.bucket(), %cause, "discarding item after exhausted retry budget");
    }
}
