#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-outbox** – Transactional Outbox for at-least-once event delivery.
//!
//! A per-execution queue of events to publish after commit. Append stores an
//! entry in the execution's pending partition; `mark_published` (and
//! `publish_events`, which calls it) moves the entry to a logically separate
//! published partition rather than flagging it in place, so
//! `get_pending_events` is a cheap read of the pending partition instead of
//! a full-stream filter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fabric_types::{EventId, ExecutionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

mod bus;
mod error;

pub use bus::{EventBus, InMemoryEventBus};
pub use error::OutboxError;

/// One event queued for publication on behalf of an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntry {
    /// Unique event id (what the bus de-duplicates on).
    pub event_id: EventId,
    /// The execution that produced this event.
    pub execution_id: ExecutionId,
    /// Realm-supplied event type tag.
    pub event_type: String,
    /// Event payload.
    pub data: Value,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct ExecutionQueue {
    pending: Vec<OutboxEntry>,
    published: Vec<OutboxEntry>,
}

/// Per-execution pending-event queue, drained to an [`EventBus`] after
/// execution commit.
pub struct Outbox {
    queues: RwLock<HashMap<ExecutionId, ExecutionQueue>>,
    bus: Box<dyn EventBus>,
}

impl Outbox {
    /// Construct an outbox draining into `bus`.
    pub fn new(bus: Box<dyn EventBus>) -> Self {
        Self { queues: RwLock::new(HashMap::new()), bus }
    }

    /// Append one event to `execution_id`'s pending queue.
    pub async fn append(
        &self,
        execution_id: impl Into<ExecutionId>,
        event_type: impl Into<String>,
        data: Value,
    ) -> OutboxEntry {
        let execution_id = execution_id.into();
        let entry = OutboxEntry {
            event_id: fabric_clock::new_id(),
            execution_id: execution_id.clone(),
            event_type: event_type.into(),
            data,
            created_at: Utc::now(),
        };
        let mut queues = self.queues.write().await;
        queues.entry(execution_id).or_default().pending.push(entry.clone());
        entry
    }

    /// All entries still pending publication for `execution_id`, in append
    /// order.
    pub async fn get_pending_events(&self, execution_id: &str) -> Vec<OutboxEntry> {
        self.queues
            .read()
            .await
            .get(execution_id)
            .map(|q| q.pending.clone())
            .unwrap_or_default()
    }

    /// All entries already published for `execution_id`, in publish order.
    pub async fn get_published_events(&self, execution_id: &str) -> Vec<OutboxEntry> {
        self.queues
            .read()
            .await
            .get(execution_id)
            .map(|q| q.published.clone())
            .unwrap_or_default()
    }

    /// Move `event_id` from pending to published for `execution_id`.
    ///
    /// Idempotent: marking an already-published (or unknown) id is a no-op
    /// rather than an error, since drains may legitimately retry.
    pub async fn mark_published(
        &self,
        execution_id: &str,
        event_id: &str,
    ) -> Result<(), OutboxError> {
        let mut queues = self.queues.write().await;
        let Some(queue) = queues.get_mut(execution_id) else {
            return Ok(());
        };
        if let Some(pos) = queue.pending.iter().position(|e| e.event_id == event_id) {
            let entry = queue.pending.remove(pos);
            queue.published.push(entry);
        }
        Ok(())
    }

    /// Drain all pending events for `execution_id`: publish each to the
    /// wired [`EventBus`] and mark it published.
    ///
    /// Idempotent: a later re-drain (after a partial failure) only sees
    /// whatever is still pending, so the bus may observe duplicates across
    /// drain attempts but never within one — callers rely on the bus to
    /// de-duplicate by `event_id` across attempts.
    pub async fn publish_events(&self, execution_id: &str) -> Result<usize, OutboxError> {
        let pending = self.get_pending_events(execution_id).await;
        let mut published = 0;
        for entry in pending {
            match self.bus.publish(&entry).await {
                Ok(()) => {
                    self.mark_published(execution_id, &entry.event_id).await?;
                    published += 1;
                }
                Err(err) => {
                    // A drain failure does not fail the execution (already
                    // committed); the remaining pending entries stay queued
                    // for a later drain pass.
                    warn!(execution_id, event_id = %entry.event_id, %err, "outbox publish failed, will retry on next drain");
                    return Ok(published);
                }
            }
        }
        Ok(published)
    }
}
