use thiserror::Error;

/// Boxed error type carried as the cause of a failed write.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A queued item together with its routing metadata.
///
/// Work items are owned by their bucket from enqueue until the batch they
/// belong to either succeeds, is discarded, or is removed by the filter.
#[derive(Debug)]
pub struct WorkItem<T> {
    seq: u64,
    bucket: usize,
    item: T,
}

impl<T> WorkItem<T> {
    pub(crate) fn new(seq: u64, bucket: usize, item: T) -> Self {
        WorkItem { seq, bucket, item }
    }

    /// Monotonically increasing enqueue sequence number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Index of the bucket the scatter policy routed this item to.
    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// The caller's item.
    #[inline]
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Consumes the work item, returning the caller's item.
    pub fn into_inner(self) -> T {
        self.item
    }
}

/// Errors that can occur inside a bucket worker.
#[derive(Debug, Error)]
pub enum BucketError {
    /// The bucket already has an active worker draining it.
    ///
    /// Recoverable: the caller should retry later rather than treat this
    /// as a hard failure.
    #[error("bucket {0} is already being drained")]
    Busy(usize),

    /// The bucket channel was closed while items were still expected.
    #[error("channel closed")]
    ChannelClosed,

    /// Draining was cancelled before the queue was empty.
    #[error("operation cancelled")]
    Cancelled,

    /// A worker task died without reporting a result.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// The installed items filter failed while a batch was being assembled.
    ///
    /// The batch is aborted without marking its items processed; they are
    /// retried on the next drain cycle.
    #[error("items filter failed")]
    Filter(#[source] BoxError),
}

/// Error raised by a processor or batch operation when a write to the
/// backing resource fails.
///
/// The two variants give the failure classifier something concrete to look
/// at: `Unavailable` is the shape of infrastructure noise (backing store
/// unreachable, cluster rejoin in progress), `Rejected` is a genuine
/// processing failure.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The backing resource rejected the write.
    #[error("write rejected by backing resource")]
    Rejected(#[source] BoxError),

    /// The infrastructure behind the backing resource is not ready.
    #[error("backing resource unavailable")]
    Unavailable(#[source] BoxError),
}

impl WriteError {
    /// Wraps an arbitrary error as a rejected write.
    pub fn rejected<E: Into<BoxError>>(cause: E) -> Self {
        WriteError::Rejected(cause.into())
    }

    /// Wraps an arbitrary error as an infrastructure outage.
    pub fn unavailable<E: Into<BoxError>>(cause: E) -> Self {
        WriteError::Unavailable(cause.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_work_item_accessors() {
        let item = WorkItem::new(7, 2, "put k1");
        assert_eq!(item.seq(), 7);
        assert_eq!(item.bucket(), 2);
        assert_eq!(item.into_inner(), "put k1");
    }

    #[test]
    fn test_write_error_preserves_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "node down");
        let err = WriteError::unavailable(source);

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "backing resource unavailable");
    }

    #[test]
    fn test_bucket_error_display() {
        assert_eq!(
            BucketError::Busy(3).to_string(),
            "bucket 3 is already being drained"
        );
        assert_eq!(BucketError::ChannelClosed.to_string(), "channel closed");
        assert_eq!(BucketError::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn test_filter_error_source() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "bad batch");
        let err = BucketError::Filter(Box::new(source));

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "items filter failed");
    }
}
