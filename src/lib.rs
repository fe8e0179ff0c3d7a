//! # write-behind
//!
//! An asynchronous write-behind queue built on Tokio, for caches that want
//! fast in-memory mutations and slow backing-resource writes to stay out
//! of each other's way.
//!
//! ## Features
//!
//! - **Partitioned ordering**: a caller-supplied scatter policy routes
//!   items to buckets; items sharing a key keep their relative order
//! - **Batched draining** with a per-bucket worker, size and interval
//!   triggers, and an optional bulk batch-operation path
//! - **Transient-aware retry**: infrastructure noise backs off and retries
//!   forever, real failures burn a bounded budget and then hit the
//!   processor's discard callback
//! - **Graceful shutdown** via cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use write_behind::bucket::{ConfigBuilder, ItemProcessor};
//! use write_behind::coordinator::WriteBehindCoordinator;
//!
//! let config = ConfigBuilder::default()
//!     .batch_size(32usize)
//!     .build()
//!     .unwrap();
//!
//! let coordinator = WriteBehindCoordinator::new(config);
//! coordinator.start(Some(MyDatabaseWriter::new()), 4, |m: &Mutation, buckets: usize| {
//!     m.key_hash() as usize % buckets
//! })?;
//!
//! coordinator.add(mutation)?; // returns immediately, written behind
//! coordinator.stop().await?; // drains and quiesces the workers
//! ```
//!
//! Delivery is at-least-once: a crash or stop between the backing write
//! and queue removal re-delivers the batch, so processors must tolerate
//! duplicate application.
//!
//! ## Modules
//!
//! - [`bucket`] - Ordered buckets, the drain state machine, and the
//!   processor/filter/classifier/batch-operation contracts
//! - [`coordinator`] - Lifecycle and API surface composing the buckets

pub mod bucket;
pub mod coordinator;
