//! Error types for outbox operations.

/// Errors raised while draining or publishing outbox entries.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// The event bus rejected or failed to accept a publish.
    #[error("event bus publish failed: {0}")]
    PublishFailed(String),
    /// The referenced event id is not pending for this execution.
    #[error("event {0} is not pending")]
    NotPending(String),
}
