// src/bucket/classifier.rs

use super::types::WriteError;

/// Decides whether a failed write was caused by transient infrastructure
/// noise or by a genuine processing error.
///
/// Transient failures are retried with backoff indefinitely and never
/// consume the discard budget; permanent failures are retried up to the
/// configured attempt limit and then discarded. The classifier is supplied
/// by the deployment environment, which knows what "the cluster is still
/// rejoining" looks like for its backing resource.
pub trait FailureClassifier: Send + Sync {
    fn is_transient(&self, error: &WriteError) -> bool;
}

impl<F> FailureClassifier for F
where
    F: Fn(&WriteError) -> bool + Send + Sync,
{
    fn is_transient(&self, error: &WriteError) -> bool {
        self(error)
    }
}

/// Default classifier: [`WriteError::Unavailable`] is transient, anything
/// else is a real processing failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct InfrastructureOutages;

impl FailureClassifier for InfrastructureOutages {
    fn is_transient(&self, error: &WriteError) -> bool {
        matches!(error, WriteError::Unavailable(_))
    }
}
