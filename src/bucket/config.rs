// src/bucket/config.rs

use derive_builder::Builder;
use std::time::Duration;

#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct Config {
    /// Maximum number of items drained from a bucket in one batch
    #[builder(default = "8")]
    pub(crate) batch_size: usize,

    /// How often a partial batch is flushed when traffic is sparse
    #[builder(default = "Duration::from_secs(1)")]
    pub(crate) flush_interval: Duration,

    /// Attempts per batch before permanent failures trigger discard
    #[builder(default = "3")]
    pub(crate) max_attempts: u32,

    /// Initial delay before a failed batch is retried
    #[builder(default = "Duration::from_millis(1000)")]
    pub(crate) retry_backoff: Duration,

    /// Upper bound for the exponentially growing retry delay
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) max_backoff: Duration,
}

impl Config {
    /// Returns the maximum batch size for one drain cycle
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the partial-batch flush interval
    #[inline]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Returns the retry budget for permanent failures
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the initial retry backoff delay
    #[inline]
    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Returns the backoff delay ceiling
    #[inline]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: 8,
            flush_interval: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
        }
    }
}
