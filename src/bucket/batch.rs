// src/bucket/batch.rs

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::processor::ExecutionContext;
use super::types::WriteError;

/// One bulk application of a drained, filtered batch to the backing
/// resource.
///
/// A batch operation amortizes round trips: a single bulk delete instead
/// of N individual deletes. The operation owns its item set; retries
/// re-apply the same operation, and [`items`](BatchOperation::items) is
/// what gets discarded if the retry budget runs out.
#[async_trait]
pub trait BatchOperation<T>: Send + Sync {
    /// The fixed set of items this operation applies.
    fn items(&self) -> &[T];

    /// Applies the whole set to the backing resource in one call.
    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), WriteError>;
}

/// Builds a [`BatchOperation`] from each drained, filtered batch.
///
/// When a factory is installed on the coordinator, workers execute batches
/// through the operations it creates instead of calling the processor's
/// batch path directly.
pub trait BatchOperationFactory<T>: Send + Sync {
    fn create(&self, items: Vec<T>) -> Box<dyn BatchOperation<T>>;
}

/// Batch operation that applies its items through a shared closure.
pub struct FnBatchOperation<T, F> {
    items: Vec<T>,
    apply: Arc<F>,
}

#[async_trait]
impl<T, F, Fut> BatchOperation<T> for FnBatchOperation<T, F>
where
    T: Clone + Send + Sync,
    F: Fn(ExecutionContext, Arc<[T]>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), WriteError>> + Send,
{
    fn items(&self) -> &[T] {
        &self.items
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), WriteError> {
        (self.apply)(ctx.clone(), Arc::from(self.items.as_slice())).await
    }
}

/// Factory wrapping a closure shared by every operation it creates.
pub struct FnBatchOperationFactory<F> {
    apply: Arc<F>,
}

impl<F> FnBatchOperationFactory<F> {
    pub fn new(apply: F) -> Self {
        FnBatchOperationFactory {
            apply: Arc::new(apply),
        }
    }
}

impl<T, F, Fut> BatchOperationFactory<T> for FnBatchOperationFactory<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(ExecutionContext, Arc<[T]>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WriteError>> + Send,
{
    fn create(&self, items: Vec<T>) -> Box<dyn BatchOperation<T>> {
        Box::new(FnBatchOperation {
            items,
            apply: Arc::clone(&self.apply),
        })
    }
}
