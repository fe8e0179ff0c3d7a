pub mod batch;
pub mod bucket;
pub mod classifier;
pub mod config;
pub mod filter;
pub mod processor;
pub mod types;

pub use batch::{BatchOperation, BatchOperationFactory, FnBatchOperationFactory};
pub use bucket::{Bucket, BucketWorker};
pub use classifier::{FailureClassifier, InfrastructureOutages};
pub use config::{Config, ConfigBuilder};
pub use filter::{FilterSlot, ItemsFilter};
pub use processor::{ExecutionContext, ItemProcessor};
pub use types::{BoxError, BucketError, WorkItem, WriteError};
