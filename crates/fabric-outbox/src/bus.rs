//! Pluggable external event bus — the outbox's publish target.
//!
//! A narrow async trait, with an in-memory broadcast-free reference
//! implementation kept around for tests. The bus proper is an external
//! collaborator out of scope here; this crate only needs something to drain
//! into.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::OutboxError;
use crate::OutboxEntry;

/// Target an outbox drains published entries into.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one entry. The bus is expected to de-duplicate by
    /// `entry.event_id` since drains are at-least-once.
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), OutboxError>;
}

/// In-memory bus that just remembers what it has seen, for tests and as the
/// default when no real bus is wired.
#[derive(Default)]
pub struct InMemoryEventBus {
    published: Mutex<Vec<OutboxEntry>>,
}

impl InMemoryEventBus {
    /// Construct an empty in-memory bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far, in publish order.
    pub async fn published(&self) -> Vec<OutboxEntry> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), OutboxError> {
        self.published.lock().await.push(entry.clone());
        Ok(())
    }
}
