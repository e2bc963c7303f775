#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-clock** – Monotonic UTC time and globally-unique identifiers.
//!
//! Every timestamp recorded by the fabric (WAL events, session/execution
//! bookkeeping, artifact lifecycle transitions) goes through a [`Clock`] so
//! tests can substitute a fixed clock instead of calling `Utc::now()`
//! directly, keeping time-sensitive assertions deterministic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of wall-clock time for the fabric.
///
/// Implementations must be monotonic from the caller's perspective: a
/// second call never returns a time earlier than the first.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real system clock, backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Generate a fresh globally-unique id (UUID v4) as an opaque string.
///
/// Used for session, intent, execution, event, and artifact ids alike — the
/// fabric treats all entity ids uniformly rather than giving each kind its
/// own id format.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh id prefixed for readability in logs (e.g. `exec-...`).
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn fixed_clock_is_stable() {
        let t = Utc::now();
        let clock = FixedClock(t);
        assert_eq!(clock.now_utc(), t);
        assert_eq!(clock.now_utc(), clock.now_utc());
    }

    #[test]
    fn prefixed_id_carries_prefix() {
        let id = new_prefixed_id("exec");
        assert!(id.starts_with("exec-"));
    }
}
