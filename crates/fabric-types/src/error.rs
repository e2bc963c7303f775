//! Shared error currency crossing crate boundaries.
//!
//! Individual crates (`fabric-store`, `fabric-bus`, `fabric-kernel`, ...)
//! still define their own `thiserror` enums for internal detail
//! (`KernelError`, `StorageError`, `BusError`); this type is the currency
//! those enums convert into at the points where the fabric needs one
//! taxonomy — inside `Execution.error`, the public API's status field, and
//! WAL failure payloads.

use serde::{Deserialize, Serialize};

/// The literal marker callers (notably automated probes) match on for any
/// missing-dependency failure.
pub const CONTRACT_8A_MARKER: &str = "Platform contract §8A";

/// Error taxonomy kinds. Not Rust type names — a classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Missing required field, unknown intent type, malformed identifier.
    Validation,
    /// Required external dependency not wired; no fallback permitted.
    Contract8A,
    /// Boundary contract refused.
    Authorization,
    /// A realm handler raised.
    HandlerFailed,
    /// Hot or durable backend timeout/unavailable, retries exhausted.
    BackendUnavailable,
    /// Prior completion found for the same idempotency key.
    IdempotencyReplay,
    /// Illegal artifact lifecycle transition or version conflict.
    LifecycleViolation,
}

/// A classified, user-safe error. Internals (stack traces) are never
/// surfaced; `message` is always human-readable.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct FabricError {
    /// Which taxonomy bucket this error falls into.
    pub kind: ErrorKind,
    /// Human-readable message. Carries the §8A marker verbatim when
    /// `kind == Contract8A`.
    pub message: String,
}

impl FabricError {
    /// Construct a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Validation, message: message.into() }
    }

    /// Construct a §8A "not wired" error. The message always contains the
    /// literal marker so automated probes can match on it.
    pub fn contract_8a(dependency: impl AsRef<str>) -> Self {
        Self {
            kind: ErrorKind::Contract8A,
            message: format!(
                "{CONTRACT_8A_MARKER}: required dependency not wired: {}",
                dependency.as_ref()
            ),
        }
    }

    /// Construct an authorization error.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Authorization, message: message.into() }
    }

    /// Construct a handler-failed error.
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::HandlerFailed, message: message.into() }
    }

    /// Construct a backend-unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::BackendUnavailable, message: message.into() }
    }

    /// Construct a lifecycle-violation error.
    pub fn lifecycle_violation(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::LifecycleViolation, message: message.into() }
    }

    /// Whether this error carries the §8A marker.
    pub fn is_contract_8a(&self) -> bool {
        self.kind == ErrorKind::Contract8A
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_8a_carries_marker() {
        let err = FabricError::contract_8a("data steward");
        assert!(err.message.contains(CONTRACT_8A_MARKER));
        assert!(err.is_contract_8a());
    }

    #[test]
    fn validation_is_not_8a() {
        let err = FabricError::validation("missing tenant id");
        assert!(!err.is_contract_8a());
    }
}
