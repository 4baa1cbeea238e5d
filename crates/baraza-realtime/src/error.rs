use baraza_store::StoreError;
use thiserror::Error;

/// Failure classes of the realtime layer. Nothing here ever terminates the
/// process; callers decide between retrying and showing a non-fatal
/// indicator.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Channel subscribe/teardown failed at the transport. Terminal for
    /// this attempt; retry policy belongs to the caller.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Rejected before any write was attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store failure that survived the degradation guard.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(String),
}
