use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bucket::{
    BatchOperationFactory, Bucket, BucketError, BucketWorker, Config, FailureClassifier,
    FilterSlot, InfrastructureOutages, ItemProcessor, ItemsFilter, WorkItem,
};

use super::scatter::ScatterPolicy;
use super::types::{CoordinatorError, Lifecycle};

/// Everything that only exists between `start` and `stop`.
struct Running<T> {
    buckets: Vec<Bucket<T>>,
    scatter: Arc<dyn ScatterPolicy<T>>,
    workers: Vec<JoinHandle<Result<(), BucketError>>>,
    shutdown: CancellationToken,
}

struct Inner<T> {
    lifecycle: Lifecycle,
    running: Option<Running<T>>,
}

/// Asynchronous write-behind coordinator.
///
/// Accepts items from producer threads, scatters them across ordered
/// buckets, and drains each bucket on its own worker: batches are
/// assembled FIFO, rewritten by the installed filter, and driven against
/// the caller-supplied [`ItemProcessor`] with transient-aware retry. Items
/// whose permanent-failure retry budget runs out are handed to the
/// processor's discard callback; nothing is dropped any other way.
///
/// The lifecycle is strictly forward: `Created → Started → Stopped →
/// Destroyed`, one transition each. `start` must be called from within a
/// Tokio runtime, since it spawns one worker task per bucket.
pub struct WriteBehindCoordinator<T> {
    config: Arc<Config>,
    filter: Arc<FilterSlot<T>>,
    classifier: Arc<dyn FailureClassifier>,
    operations: Option<Arc<dyn BatchOperationFactory<T>>>,
    pending: Arc<AtomicUsize>,
    seq: AtomicU64,
    inner: RwLock<Inner<T>>,
}

impl<T> WriteBehindCoordinator<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a coordinator in the `Created` state.
    pub fn new(config: Config) -> Self {
        WriteBehindCoordinator {
            config: Arc::new(config),
            filter: Arc::new(FilterSlot::new()),
            classifier: Arc::new(InfrastructureOutages),
            operations: None,
            pending: Arc::new(AtomicUsize::new(0)),
            seq: AtomicU64::new(0),
            inner: RwLock::new(Inner {
                lifecycle: Lifecycle::Created,
                running: None,
            }),
        }
    }

    /// Replaces the failure classifier before `start`.
    ///
    /// The deployment environment supplies this: it knows which errors of
    /// its backing resource are cluster noise rather than real failures.
    pub fn with_classifier(mut self, classifier: impl FailureClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Routes batches through operations built by `factory` instead of
    /// the processor's batch path.
    pub fn with_batch_operations(
        mut self,
        factory: impl BatchOperationFactory<T> + 'static,
    ) -> Self {
        self.operations = Some(Arc::new(factory));
        self
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).lifecycle
    }

    /// Number of items accepted but not yet written, discarded, or
    /// filtered out.
    ///
    /// Evaluated from a shared counter without taking any lock, so under
    /// concurrent mutation this is an eventually consistent estimate; it
    /// is never negative.
    pub fn queue_size(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Creates `concurrency` buckets and spawns one worker per bucket.
    ///
    /// Fails with [`CoordinatorError::Configuration`] if the processor is
    /// absent, `concurrency` is zero, or the drain configuration is
    /// degenerate; nothing is created on failure. A second call fails
    /// with [`CoordinatorError::Lifecycle`].
    pub fn start<P>(
        &self,
        processor: Option<P>,
        concurrency: usize,
        scatter: impl ScatterPolicy<T> + 'static,
    ) -> Result<(), CoordinatorError>
    where
        P: ItemProcessor<T> + 'static,
    {
        let processor = processor
            .ok_or_else(|| CoordinatorError::Configuration("processor is required".into()))?;
        if concurrency < 1 {
            return Err(CoordinatorError::Configuration(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.config.batch_size() < 1 {
            return Err(CoordinatorError::Configuration(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.config.max_attempts() < 1 {
            return Err(CoordinatorError::Configuration(
                "max_attempts must be at least 1".into(),
            ));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.lifecycle != Lifecycle::Created {
            return Err(CoordinatorError::Lifecycle(format!(
                "start is only valid once, coordinator is {}",
                inner.lifecycle
            )));
        }

        let shutdown = CancellationToken::new();
        let worker = Arc::new(BucketWorker::new(
            Arc::new(processor),
            Arc::clone(&self.filter),
            Arc::clone(&self.classifier),
            self.operations.clone(),
        ));

        let mut buckets = Vec::with_capacity(concurrency);
        let mut workers = Vec::with_capacity(concurrency);
        for index in 0..concurrency {
            let bucket = Bucket::new(index, Arc::clone(&self.config), Arc::clone(&self.pending));

            let bucket_clone = bucket.clone();
            let worker_clone = Arc::clone(&worker);
            let cancel = shutdown.clone();
            workers.push(tokio::spawn(async move {
                bucket_clone.run(&cancel, &worker_clone).await
            }));

            buckets.push(bucket);
        }

        info!(concurrency, "write-behind coordinator started");
        inner.lifecycle = Lifecycle::Started;
        inner.running = Some(Running {
            buckets,
            scatter: Arc::new(scatter),
            workers,
            shutdown,
        });
        Ok(())
    }

    /// Accepts an item for asynchronous write-behind.
    ///
    /// An absent item is a no-op that leaves the queue size unchanged.
    /// Otherwise the scatter policy picks the bucket and the item is
    /// appended to its tail; the call never blocks and never waits for
    /// the write itself.
    pub fn add(&self, item: impl Into<Option<T>>) -> Result<(), CoordinatorError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let running = match (&inner.lifecycle, &inner.running) {
            (Lifecycle::Started, Some(running)) => running,
            (state, _) => {
                return Err(CoordinatorError::Lifecycle(format!(
                    "add is only valid while started, coordinator is {state}"
                )));
            }
        };

        let item = match item.into() {
            Some(item) => item,
            None => return Ok(()),
        };

        let index = running.scatter.select_bucket(&item, running.buckets.len())
            % running.buckets.len();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        running.buckets[index].offer(WorkItem::new(seq, index, item))?;
        Ok(())
    }

    /// Installs or replaces the items filter.
    ///
    /// Takes effect for batches not yet assembled; the batch a worker is
    /// currently executing is unaffected.
    pub fn set_operations_filter(
        &self,
        filter: impl ItemsFilter<T> + 'static,
    ) -> Result<(), CoordinatorError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if inner.lifecycle != Lifecycle::Started {
            return Err(CoordinatorError::Lifecycle(format!(
                "set_operations_filter is only valid while started, coordinator is {}",
                inner.lifecycle
            )));
        }
        self.filter.install(Arc::new(filter));
        Ok(())
    }

    /// Stops accepting items, drains the buckets, and waits for every
    /// worker to quiesce.
    ///
    /// In-flight batches finish; a batch waiting out a backoff is
    /// abandoned to redelivery. Single-shot: a second call fails with
    /// [`CoordinatorError::Lifecycle`] and has no side effect.
    pub async fn stop(&self) -> Result<(), CoordinatorError> {
        let running = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if inner.lifecycle != Lifecycle::Started {
                return Err(CoordinatorError::Lifecycle(format!(
                    "stop is only valid once after start, coordinator is {}",
                    inner.lifecycle
                )));
            }
            inner.lifecycle = Lifecycle::Stopped;
            inner.running.take()
        };

        let running = match running {
            Some(running) => running,
            None => return Ok(()),
        };

        for bucket in &running.buckets {
            bucket.close();
        }
        // Lets in-flight processors observe the shutdown through their
        // execution context while the final drain runs.
        running.shutdown.cancel();

        let mut errors = Vec::new();
        for result in join_all(running.workers).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(BucketError::Worker(e.to_string())),
            }
        }

        info!(left = self.queue_size(), "write-behind coordinator stopped");

        if let Some(first) = errors.into_iter().next() {
            return Err(first.into());
        }
        Ok(())
    }

    /// Releases the queue representation.
    ///
    /// Valid only after `stop`. Once destroyed, no other cluster member
    /// should replay this queue; any items abandoned during shutdown are
    /// dropped from the local count.
    pub fn destroy(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.lifecycle != Lifecycle::Stopped {
            return Err(CoordinatorError::Lifecycle(format!(
                "destroy is only valid after stop, coordinator is {}",
                inner.lifecycle
            )));
        }

        inner.lifecycle = Lifecycle::Destroyed;
        inner.running = None;
        let left = self.pending.swap(0, Ordering::SeqCst);
        if left > 0 {
            warn!(left, "destroying queue with unprocessed items");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
