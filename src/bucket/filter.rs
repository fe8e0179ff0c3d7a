// src/bucket/filter.rs

use std::sync::{Arc, RwLock};

use super::types::{BoxError, WorkItem};

/// Hook that rewrites an assembled batch before it is executed.
///
/// The filter's output is authoritative: entries it removes are neither
/// processed nor discarded, they simply vanish from the queue. Typical use
/// is coalescing superseded writes for the same key. The filter may remove
/// or reorder entries; it cannot introduce items that were never queued,
/// since work items are only ever constructed on enqueue.
pub trait ItemsFilter<T>: Send + Sync {
    fn apply(&self, items: &mut Vec<WorkItem<T>>) -> Result<(), BoxError>;
}

impl<T, F> ItemsFilter<T> for F
where
    F: Fn(&mut Vec<WorkItem<T>>) -> Result<(), BoxError> + Send + Sync,
{
    fn apply(&self, items: &mut Vec<WorkItem<T>>) -> Result<(), BoxError> {
        self(items)
    }
}

/// Shared cell holding the currently installed filter.
///
/// The coordinator replaces the contents on `set_operations_filter`; each
/// worker snapshots it once per drain cycle, so a replacement takes effect
/// for batches not yet assembled.
pub struct FilterSlot<T> {
    inner: RwLock<Option<Arc<dyn ItemsFilter<T>>>>,
}

impl<T> FilterSlot<T> {
    pub fn new() -> Self {
        FilterSlot {
            inner: RwLock::new(None),
        }
    }

    /// Installs or replaces the filter.
    pub fn install(&self, filter: Arc<dyn ItemsFilter<T>>) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(filter);
    }

    /// Snapshot of the current filter, if any.
    pub fn current(&self) -> Option<Arc<dyn ItemsFilter<T>>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl<T> Default for FilterSlot<T> {
    fn default() -> Self {
        FilterSlot::new()
    }
}
