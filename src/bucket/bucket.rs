use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::batch::{BatchOperation, BatchOperationFactory};
use super::classifier::FailureClassifier;
use super::config::Config;
use super::filter::FilterSlot;
use super::processor::{ExecutionContext, ItemProcessor};
use super::types::{BucketError, WorkItem};

/// The collaborators a worker consults for every drained batch.
pub struct BucketWorker<T> {
    processor: Arc<dyn ItemProcessor<T>>,
    filter: Arc<FilterSlot<T>>,
    classifier: Arc<dyn FailureClassifier>,
    operations: Option<Arc<dyn BatchOperationFactory<T>>>,
}

impl<T> BucketWorker<T> {
    pub fn new(
        processor: Arc<dyn ItemProcessor<T>>,
        filter: Arc<FilterSlot<T>>,
        classifier: Arc<dyn FailureClassifier>,
        operations: Option<Arc<dyn BatchOperationFactory<T>>>,
    ) -> Self {
        BucketWorker {
            processor,
            filter,
            classifier,
            operations,
        }
    }
}

/// The body of one drain cycle: either the raw batch handed to the
/// processor, or a batch operation built from it.
enum Payload<T> {
    Items(Vec<T>),
    Operation(Box<dyn BatchOperation<T>>),
}

impl<T> Payload<T> {
    fn items(&self) -> &[T] {
        match self {
            Payload::Items(items) => items,
            Payload::Operation(op) => op.items(),
        }
    }

    fn len(&self) -> usize {
        self.items().len()
    }
}

/// An ordered partition of the write-behind queue.
///
/// Producers append concurrently through [`offer`](Bucket::offer); exactly
/// one worker at a time drains the bucket through [`run`](Bucket::run).
/// FIFO order is preserved from enqueue to dequeue, which is what gives
/// items sharing a partition key their ordering guarantee.
pub struct Bucket<T> {
    index: usize,
    config: Arc<Config>,
    sender: mpsc::UnboundedSender<WorkItem<T>>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem<T>>>>,
    pending: Arc<AtomicUsize>,
    active: Arc<AtomicBool>,
    done: CancellationToken,
}

impl<T> Clone for Bucket<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            config: self.config.clone(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            pending: self.pending.clone(),
            active: self.active.clone(),
            done: self.done.clone(),
        }
    }
}

impl<T> Bucket<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a bucket with the given index.
    ///
    /// `pending` is shared with the owning coordinator: it is incremented
    /// on enqueue and only decremented once an item has been written,
    /// discarded, or removed by the filter.
    pub fn new(index: usize, config: Arc<Config>, pending: Arc<AtomicUsize>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            index,
            config,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            pending,
            active: Arc::new(AtomicBool::new(false)),
            done: CancellationToken::new(),
        }
    }

    /// Index of this bucket, fixed at coordinator start.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Appends a work item to the tail of the bucket.
    ///
    /// Never blocks; the worker wakes on its own when the bucket becomes
    /// non-empty.
    pub fn offer(&self, item: WorkItem<T>) -> Result<(), BucketError> {
        self.sender
            .send(item)
            .map_err(|_| BucketError::ChannelClosed)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Signals the worker to finish what it is doing, drain what is left,
    /// and stop.
    pub fn close(&self) {
        self.done.cancel();
    }

    /// Drains this bucket until it is closed or `cancel` fires.
    ///
    /// At most one worker may drain a bucket at a time; a second call
    /// while one is active fails with [`BucketError::Busy`], which the
    /// scheduler treats as "retry later" rather than a hard failure.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        worker: &BucketWorker<T>,
    ) -> Result<(), BucketError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(BucketError::Busy(self.index));
        }

        let result = self.drain_loop(cancel, worker).await;
        self.active.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_loop(
        &self,
        cancel: &CancellationToken,
        worker: &BucketWorker<T>,
    ) -> Result<(), BucketError> {
        let mut queue: Vec<WorkItem<T>> = Vec::with_capacity(self.config.batch_size);
        // First flush one interval after start, not immediately
        let mut ticker = interval_at(
            Instant::now() + self.config.flush_interval,
            self.config.flush_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(bucket = self.index, "worker cancelled, draining remaining items");
                    return self.drain_remaining(cancel, worker, &mut queue).await;
                }

                _ = self.done.cancelled() => {
                    debug!(bucket = self.index, "stop requested, draining remaining items");
                    return self.drain_remaining(cancel, worker, &mut queue).await;
                }

                _ = ticker.tick() => {
                    if !queue.is_empty() && !self.flush_running(cancel, worker, &mut queue).await? {
                        return Ok(());
                    }
                }

                item = async {
                    let mut rx = self.receiver.lock().await;
                    rx.recv().await
                } => {
                    match item {
                        Some(item) => {
                            queue.push(item);

                            if queue.len() >= self.config.batch_size
                                && !self.flush_running(cancel, worker, &mut queue).await?
                            {
                                return Ok(());
                            }
                        }
                        None => {
                            debug!(bucket = self.index, "channel closed, flushing and stopping");
                            return self.drain_remaining(cancel, worker, &mut queue).await;
                        }
                    }
                }
            }
        }
    }

    /// Flush during normal operation.
    ///
    /// Returns `false` when a stop request landed while the batch was
    /// waiting out a backoff, which ends the worker without draining.
    async fn flush_running(
        &self,
        cancel: &CancellationToken,
        worker: &BucketWorker<T>,
        queue: &mut Vec<WorkItem<T>>,
    ) -> Result<bool, BucketError> {
        match self.flush(cancel, worker, queue, false).await {
            Ok(()) => Ok(true),
            Err(BucketError::Cancelled) => {
                warn!(
                    bucket = self.index,
                    left = queue.len(),
                    "stopped during backoff, abandoning remaining items"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Shutdown path: processes what is buffered, then empties the channel.
    ///
    /// A stop that lands while a batch is waiting out a backoff abandons
    /// the remainder instead of retrying forever; those items stay counted
    /// as pending and are redelivered from the durable queue on restart.
    async fn drain_remaining(
        &self,
        cancel: &CancellationToken,
        worker: &BucketWorker<T>,
        queue: &mut Vec<WorkItem<T>>,
    ) -> Result<(), BucketError> {
        loop {
            let item = {
                let mut rx = self.receiver.lock().await;
                rx.try_recv().ok()
            };
            match item {
                Some(item) => queue.push(item),
                None => break,
            }
        }

        match self.flush(cancel, worker, queue, true).await {
            Ok(()) => Ok(()),
            Err(BucketError::Cancelled) => {
                warn!(
                    bucket = self.index,
                    left = queue.len(),
                    "stopped during backoff, abandoning remaining items"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Processes the buffered items in batches of up to `batch_size`.
    async fn flush(
        &self,
        cancel: &CancellationToken,
        worker: &BucketWorker<T>,
        queue: &mut Vec<WorkItem<T>>,
        shutting_down: bool,
    ) -> Result<(), BucketError> {
        while !queue.is_empty() {
            let take = queue.len().min(self.config.batch_size);
            let mut drained: Vec<WorkItem<T>> = queue.drain(..take).collect();

            // The filter's output is authoritative: whatever it removes is
            // neither processed nor discarded.
            if let Some(filter) = worker.filter.current() {
                let before = drained.len();
                if let Err(cause) = filter.apply(&mut drained) {
                    warn!(
                        bucket = self.index,
                        error = %cause,
                        "items filter failed, batch deferred to next cycle"
                    );
                    self.pending
                        .fetch_sub(before - drained.len(), Ordering::SeqCst);
                    drained.append(queue);
                    *queue = drained;
                    return Ok(());
                }
                self.pending
                    .fetch_sub(before - drained.len(), Ordering::SeqCst);
                if drained.is_empty() {
                    continue;
                }
            }

            let items: Vec<T> = drained.into_iter().map(WorkItem::into_inner).collect();
            let payload = match &worker.operations {
                Some(factory) => Payload::Operation(factory.create(items)),
                None => Payload::Items(items),
            };

            self.execute(cancel, worker, payload, shutting_down).await?;
        }
        Ok(())
    }

    /// Drives one batch to completion: written, or discarded after the
    /// retry budget runs out.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        worker: &BucketWorker<T>,
        payload: Payload<T>,
        shutting_down: bool,
    ) -> Result<(), BucketError> {
        let mut attempt: u32 = 1;
        let mut delay = self.config.retry_backoff;

        loop {
            let ctx = ExecutionContext::new(self.index, attempt, cancel.clone());
            let result = match &payload {
                Payload::Operation(op) => op.apply(&ctx).await,
                Payload::Items(items) if items.len() == 1 => {
                    worker.processor.process(&ctx, &items[0]).await
                }
                Payload::Items(items) => worker.processor.process_batch(&ctx, items).await,
            };

            let err = match result {
                Ok(()) => {
                    self.pending.fetch_sub(payload.len(), Ordering::SeqCst);
                    debug!(bucket = self.index, count = payload.len(), "batch written");
                    return Ok(());
                }
                Err(err) => err,
            };

            if worker.classifier.is_transient(&err) {
                // Infrastructure noise: retry forever, never consume the
                // discard budget.
                warn!(
                    bucket = self.index,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient infrastructure failure, backing off"
                );
                if shutting_down {
                    return Err(BucketError::Cancelled);
                }
                self.backoff(&mut delay, shutting_down).await?;
                continue;
            }

            if attempt >= self.config.max_attempts {
                error!(
                    bucket = self.index,
                    count = payload.len(),
                    error = %err,
                    "retry budget exhausted, discarding batch"
                );
                for item in payload.items() {
                    worker.processor.discard(&ctx, item, &err).await;
                }
                self.pending.fetch_sub(payload.len(), Ordering::SeqCst);
                return Ok(());
            }

            warn!(
                bucket = self.index,
                attempt,
                error = %err,
                "batch write failed, retrying"
            );
            attempt += 1;
            self.backoff(&mut delay, shutting_down).await?;
        }
    }

    /// Waits out the current delay, then doubles it up to the ceiling.
    async fn backoff(
        &self,
        delay: &mut Duration,
        shutting_down: bool,
    ) -> Result<(), BucketError> {
        if shutting_down {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(*delay) => {}
                _ = self.done.cancelled() => return Err(BucketError::Cancelled),
            }
        }
        *delay = (*delay * 2).min(self.config.max_backoff);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::classifier::InfrastructureOutages;
    use crate::bucket::types::WriteError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn test_config(batch_size: usize) -> Arc<Config> {
        Arc::new(Config {
            batch_size,
            flush_interval: Duration::from_millis(50),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        })
    }

    fn test_bucket(batch_size: usize) -> (Bucket<i32>, Arc<AtomicUsize>) {
        let pending = Arc::new(AtomicUsize::new(0));
        (Bucket::new(0, test_config(batch_size), pending.clone()), pending)
    }

    fn test_worker(processor: Arc<dyn ItemProcessor<i32>>) -> BucketWorker<i32> {
        BucketWorker::new(
            processor,
            Arc::new(FilterSlot::new()),
            Arc::new(InfrastructureOutages),
            None,
        )
    }

    fn offer_all(bucket: &Bucket<i32>, items: &[i32]) {
        for (seq, item) in items.iter().enumerate() {
            bucket
                .offer(WorkItem::new(seq as u64, bucket.index(), *item))
                .unwrap();
        }
    }

    // Processor that collects written items in order
    struct CollectingProcessor {
        written: Arc<tokio::sync::Mutex<Vec<i32>>>,
    }

    #[async_trait]
    impl ItemProcessor<i32> for CollectingProcessor {
        async fn process(&self, _ctx: &ExecutionContext, item: &i32) -> Result<(), WriteError> {
            self.written.lock().await.push(*item);
            Ok(())
        }
    }

    // Processor that fails a set number of times before succeeding
    struct FlakyProcessor {
        failures_left: AtomicUsize,
        written: Arc<AtomicUsize>,
        discarded: Arc<AtomicUsize>,
        transient: bool,
    }

    #[async_trait]
    impl ItemProcessor<i32> for FlakyProcessor {
        async fn process(&self, _ctx: &ExecutionContext, _item: &i32) -> Result<(), WriteError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                let cause = std::io::Error::new(std::io::ErrorKind::Other, "write failed");
                return if self.transient {
                    Err(WriteError::unavailable(cause))
                } else {
                    Err(WriteError::rejected(cause))
                };
            }
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn discard(&self, _ctx: &ExecutionContext, _item: &i32, _cause: &WriteError) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let (bucket, _) = test_bucket(4);
        let cancel = CancellationToken::new();

        let written = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let worker = test_worker(Arc::new(CollectingProcessor {
            written: written.clone(),
        }));

        offer_all(&bucket, &(0..20).collect::<Vec<_>>());
        bucket.close();

        bucket.run(&cancel, &worker).await.unwrap();

        let written = written.lock().await;
        assert_eq!(*written, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pending_counter_accounting() {
        let (bucket, pending) = test_bucket(4);
        let cancel = CancellationToken::new();

        offer_all(&bucket, &[1, 2, 3]);
        assert_eq!(pending.load(Ordering::SeqCst), 3);

        let written = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let worker = test_worker(Arc::new(CollectingProcessor {
            written: written.clone(),
        }));

        bucket.close();
        bucket.run(&cancel, &worker).await.unwrap();

        assert_eq!(pending.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_run_observes_busy() {
        let (bucket, _) = test_bucket(4);
        let cancel = CancellationToken::new();

        let written = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let worker = Arc::new(test_worker(Arc::new(CollectingProcessor {
            written: written.clone(),
        })));

        let bucket_clone = bucket.clone();
        let cancel_clone = cancel.clone();
        let worker_clone = worker.clone();
        let handle = tokio::spawn(async move {
            bucket_clone.run(&cancel_clone, &worker_clone).await
        });

        sleep(Duration::from_millis(20)).await;
        let second = bucket.run(&cancel, &worker).await;
        assert!(matches!(second, Err(BucketError::Busy(0))));

        bucket.close();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_flush_interval_flushes_partial_batch() {
        let (bucket, _) = test_bucket(100);
        let cancel = CancellationToken::new();

        let written = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let worker = test_worker(Arc::new(CollectingProcessor {
            written: written.clone(),
        }));

        let bucket_clone = bucket.clone();
        tokio::spawn(async move {
            offer_all(&bucket_clone, &[1, 2]);
            // Well past the flush interval, nowhere near batch_size
            sleep(Duration::from_millis(200)).await;
            bucket_clone.close();
        });

        bucket.run(&cancel, &worker).await.unwrap();
        assert_eq!(written.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_retries_then_succeeds() {
        let (bucket, _) = test_bucket(4);
        let cancel = CancellationToken::new();

        let written = Arc::new(AtomicUsize::new(0));
        let discarded = Arc::new(AtomicUsize::new(0));
        let worker = test_worker(Arc::new(FlakyProcessor {
            failures_left: AtomicUsize::new(2),
            written: written.clone(),
            discarded: discarded.clone(),
            transient: false,
        }));

        offer_all(&bucket, &[7]);
        bucket.close();
        bucket.run(&cancel, &worker).await.unwrap();

        // Two failures fit inside the budget of three attempts
        assert_eq!(written.load(Ordering::SeqCst), 1);
        assert_eq!(discarded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_budget_discards_each_item_once() {
        let (bucket, pending) = test_bucket(4);
        let cancel = CancellationToken::new();

        let written = Arc::new(AtomicUsize::new(0));
        let discarded = Arc::new(AtomicUsize::new(0));
        let worker = test_worker(Arc::new(FlakyProcessor {
            failures_left: AtomicUsize::new(usize::MAX),
            written: written.clone(),
            discarded: discarded.clone(),
            transient: false,
        }));

        offer_all(&bucket, &[1, 2, 3]);
        bucket.close();
        bucket.run(&cancel, &worker).await.unwrap();

        assert_eq!(written.load(Ordering::SeqCst), 0);
        assert_eq!(discarded.load(Ordering::SeqCst), 3);
        assert_eq!(pending.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_never_discard() {
        let (bucket, _) = test_bucket(4);
        let cancel = CancellationToken::new();

        let written = Arc::new(AtomicUsize::new(0));
        let discarded = Arc::new(AtomicUsize::new(0));
        // More transient failures than the permanent budget allows
        let worker = test_worker(Arc::new(FlakyProcessor {
            failures_left: AtomicUsize::new(5),
            written: written.clone(),
            discarded: discarded.clone(),
            transient: true,
        }));

        let bucket_clone = bucket.clone();
        tokio::spawn(async move {
            offer_all(&bucket_clone, &[9]);
            sleep(Duration::from_millis(400)).await;
            bucket_clone.close();
        });

        bucket.run(&cancel, &worker).await.unwrap();

        assert_eq!(written.load(Ordering::SeqCst), 1);
        assert_eq!(discarded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filter_removal_skips_process_and_discard() {
        let (bucket, pending) = test_bucket(4);
        let cancel = CancellationToken::new();

        let filter_slot: Arc<FilterSlot<i32>> = Arc::new(FilterSlot::new());
        filter_slot.install(Arc::new(
            |items: &mut Vec<WorkItem<i32>>| -> Result<(), crate::bucket::BoxError> {
                items.retain(|wi| *wi.item() != 3);
                Ok(())
            },
        ));

        let written = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let worker = BucketWorker::new(
            Arc::new(CollectingProcessor {
                written: written.clone(),
            }),
            filter_slot,
            Arc::new(InfrastructureOutages),
            None,
        );

        offer_all(&bucket, &[1, 2, 3, 4]);
        bucket.close();
        bucket.run(&cancel, &worker).await.unwrap();

        assert_eq!(*written.lock().await, vec![1, 2, 4]);
        assert_eq!(pending.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_operation_path_applies_once_per_cycle() {
        use crate::bucket::batch::FnBatchOperationFactory;

        let (bucket, _) = test_bucket(4);
        let cancel = CancellationToken::new();

        let bulk_calls = Arc::new(AtomicUsize::new(0));
        let applied = Arc::new(AtomicUsize::new(0));

        let bulk_clone = bulk_calls.clone();
        let applied_clone = applied.clone();
        let factory = FnBatchOperationFactory::new(move |_ctx: ExecutionContext, items: Arc<[i32]>| {
            let bulk = bulk_clone.clone();
            let applied = applied_clone.clone();
            async move {
                bulk.fetch_add(1, Ordering::SeqCst);
                applied.fetch_add(items.len(), Ordering::SeqCst);
                Ok::<(), WriteError>(())
            }
        });

        let written = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let worker = BucketWorker::new(
            Arc::new(CollectingProcessor {
                written: written.clone(),
            }),
            Arc::new(FilterSlot::new()),
            Arc::new(InfrastructureOutages),
            Some(Arc::new(factory)),
        );

        offer_all(&bucket, &[1, 2, 3, 4]);
        bucket.close();
        bucket.run(&cancel, &worker).await.unwrap();

        // One bulk call for the whole batch, processor path untouched
        assert_eq!(bulk_calls.load(Ordering::SeqCst), 1);
        assert_eq!(applied.load(Ordering::SeqCst), 4);
        assert!(written.lock().await.is_empty());
    }
}
