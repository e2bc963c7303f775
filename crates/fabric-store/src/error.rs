//! Error types for state-surface backends.

/// Errors a [`crate::KvBackend`] implementation can raise.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend's I/O layer failed.
    #[error("backend I/O failed: {0}")]
    Io(String),
    /// Stored value could not be decoded back into JSON.
    #[error("corrupt stored value at {0}")]
    Corrupt(String),
}
