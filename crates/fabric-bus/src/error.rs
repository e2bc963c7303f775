//! Error types for WAL operations.

/// Errors a [`crate::WalBackend`] implementation can raise.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// The requested consumer group does not exist for this partition.
    #[error("consumer group not found: {0}")]
    GroupNotFound(String),
    /// The backing store is unreachable.
    #[error("WAL backend unavailable: {0}")]
    BackendUnavailable(String),
}
