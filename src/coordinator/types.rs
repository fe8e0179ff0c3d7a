/// Lifecycle states of a coordinator.
///
/// Transitions are strictly forward and single-shot:
/// `Created → Started → Stopped → Destroyed`. No state is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Started,
    Stopped,
    Destroyed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Lifecycle::Created => "created",
            Lifecycle::Started => "started",
            Lifecycle::Stopped => "stopped",
            Lifecycle::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the coordinator API
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Invalid `start` arguments; nothing was created.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// API call not valid in the current lifecycle state.
    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(String),

    /// A bucket worker failed.
    #[error("bucket operation failed: {0}")]
    Bucket(#[from] crate::bucket::BucketError),
}
