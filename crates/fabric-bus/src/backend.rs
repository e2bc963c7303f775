//! Pluggable WAL stream backends.
//!
//! A narrow async trait any driver can implement, with an in-memory
//! reference implementation always available for tests and as the WAL's
//! degraded-mode fallback, plus a `sled`-backed durable implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fabric_types::WalEvent;
use tokio::sync::RwLock;

use crate::error::WalError;

/// A stream's native sequence number. Totally orders events within one
/// (tenant, date) partition.
pub type SequenceNumber = u64;

/// One committed entry: its assigned sequence plus the event itself.
#[derive(Debug, Clone)]
pub struct WalEntry {
    /// Sequence assigned by the partition stream.
    pub sequence: SequenceNumber,
    /// The committed event.
    pub event: WalEvent,
}

/// Abstraction over an append-only, partitioned event stream with
/// consumer-group replay.
#[async_trait]
pub trait WalBackend: Send + Sync {
    /// Append `event` to `partition`, returning its assigned sequence.
    async fn append(&self, partition: &str, event: WalEvent) -> Result<SequenceNumber, WalError>;

    /// Read all entries in `partition` (ascending sequence order).
    async fn range(&self, partition: &str) -> Result<Vec<WalEntry>, WalError>;

    /// Create a consumer group on `partition` starting from the beginning.
    async fn create_group(&self, partition: &str, group: &str) -> Result<(), WalError>;

    /// Read up to `count` entries not yet delivered to `group` on `partition`.
    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<WalEntry>, WalError>;

    /// Acknowledge sequences as processed by `group` on `partition`.
    async fn acknowledge(
        &self,
        partition: &str,
        group: &str,
        sequences: &[SequenceNumber],
    ) -> Result<usize, WalError>;
}

#[derive(Default)]
struct Partition {
    entries: Vec<WalEntry>,
    next_sequence: SequenceNumber,
    /// group name -> set of acknowledged sequences.
    groups: HashMap<String, std::collections::BTreeSet<SequenceNumber>>,
    /// group name -> next offset into `entries` to hand out on `read_group`.
    cursors: HashMap<String, usize>,
}

/// In-memory WAL backend. Always available; used directly in tests and as
/// the fallback the [`crate::WriteAheadLog`] degrades to when no durable
/// backend is wired or the durable backend errors.
#[derive(Default)]
pub struct MemoryWalBackend {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl MemoryWalBackend {
    /// Construct an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc` for sharing across the runtime.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl WalBackend for MemoryWalBackend {
    async fn append(&self, partition: &str, event: WalEvent) -> Result<SequenceNumber, WalError> {
        let mut partitions = self.partitions.write().await;
        let part = partitions.entry(partition.to_string()).or_default();
        let sequence = part.next_sequence;
        part.next_sequence += 1;
        part.entries.push(WalEntry { sequence, event });
        Ok(sequence)
    }

    async fn range(&self, partition: &str) -> Result<Vec<WalEntry>, WalError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(partition)
            .map(|p| p.entries.clone())
            .unwrap_or_default())
    }

    async fn create_group(&self, partition: &str, group: &str) -> Result<(), WalError> {
        let mut partitions = self.partitions.write().await;
        let part = partitions.entry(partition.to_string()).or_default();
        part.groups.entry(group.to_string()).or_default();
        part.cursors.entry(group.to_string()).or_insert(0);
        Ok(())
    }

    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<WalEntry>, WalError> {
        let mut partitions = self.partitions.write().await;
        let part = partitions
            .get_mut(partition)
            .ok_or_else(|| WalError::GroupNotFound(group.to_string()))?;
        if !part.groups.contains_key(group) {
            return Err(WalError::GroupNotFound(group.to_string()));
        }
        let cursor = *part.cursors.get(group).unwrap_or(&0);
        let end = (cursor + count).min(part.entries.len());
        let batch = part.entries[cursor..end].to_vec();
        part.cursors.insert(group.to_string(), end);
        Ok(batch)
    }

    async fn acknowledge(
        &self,
        partition: &str,
        group: &str,
        sequences: &[SequenceNumber],
    ) -> Result<usize, WalError> {
        let mut partitions = self.partitions.write().await;
        let part = partitions
            .get_mut(partition)
            .ok_or_else(|| WalError::GroupNotFound(group.to_string()))?;
        let acked = part
            .groups
            .entry(group.to_string())
            .or_default();
        let mut count = 0;
        for seq in sequences {
            if acked.insert(*seq) {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn io_err(e: sled::Error) -> WalError {
    WalError::BackendUnavailable(e.to_string())
}

const ENTRY_PREFIX: &[u8] = b"e:";
const SEQUENCE_PREFIX: &[u8] = b"s:";
const GROUP_PREFIX: &[u8] = b"g:";
const CURSOR_PREFIX: &[u8] = b"c:";
const ACK_PREFIX: &[u8] = b"a:";
const SEP: u8 = 0;

fn entry_prefix(partition: &str) -> Vec<u8> {
    let mut key = ENTRY_PREFIX.to_vec();
    key.extend_from_slice(partition.as_bytes());
    key.push(SEP);
    key
}

fn entry_key(partition: &str, sequence: SequenceNumber) -> Vec<u8> {
    let mut key = entry_prefix(partition);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn sequence_counter_key(partition: &str) -> Vec<u8> {
    let mut key = SEQUENCE_PREFIX.to_vec();
    key.extend_from_slice(partition.as_bytes());
    key
}

fn group_marker_key(partition: &str, group: &str) -> Vec<u8> {
    let mut key = GROUP_PREFIX.to_vec();
    key.extend_from_slice(partition.as_bytes());
    key.push(SEP);
    key.extend_from_slice(group.as_bytes());
    key
}

fn cursor_key(partition: &str, group: &str) -> Vec<u8> {
    let mut key = CURSOR_PREFIX.to_vec();
    key.extend_from_slice(partition.as_bytes());
    key.push(SEP);
    key.extend_from_slice(group.as_bytes());
    key
}

fn ack_key(partition: &str, group: &str, sequence: SequenceNumber) -> Vec<u8> {
    let mut key = ACK_PREFIX.to_vec();
    key.extend_from_slice(partition.as_bytes());
    key.push(SEP);
    key.extend_from_slice(group.as_bytes());
    key.push(SEP);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Durable WAL backend over an embedded `sled` database. Entries, the
/// per-partition sequence counter, consumer-group cursors, and
/// acknowledgement markers each live under their own key prefix within the
/// same tree; sequence numbers are assigned contiguously per partition the
/// same way [`MemoryWalBackend`] assigns them, so a cursor can be read back
/// as a plain "entries already delivered" count.
pub struct SledWalBackend {
    db: sled::Db,
}

impl SledWalBackend {
    /// Open (creating if absent) a sled database rooted at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, WalError> {
        let db = sled::open(path).map_err(io_err)?;
        Ok(Self { db })
    }

    async fn group_exists(&self, partition: &str, group: &str) -> Result<bool, WalError> {
        let db = self.db.clone();
        let key = group_marker_key(partition, group);
        let found = tokio::task::spawn_blocking(move || db.get(key).map_err(io_err))
            .await
            .map_err(|e| WalError::BackendUnavailable(e.to_string()))??;
        Ok(found.is_some())
    }

    async fn cursor_value(&self, partition: &str, group: &str) -> Result<u64, WalError> {
        let db = self.db.clone();
        let key = cursor_key(partition, group);
        let bytes = tokio::task::spawn_blocking(move || db.get(key).map_err(io_err))
            .await
            .map_err(|e| WalError::BackendUnavailable(e.to_string()))??;
        Ok(match bytes {
            Some(v) => u64::from_be_bytes(
                v.as_ref()
                    .try_into()
                    .map_err(|_| WalError::BackendUnavailable("corrupt cursor".to_string()))?,
            ),
            None => 0,
        })
    }

    async fn set_cursor(&self, partition: &str, group: &str, value: u64) -> Result<(), WalError> {
        let db = self.db.clone();
        let key = cursor_key(partition, group);
        tokio::task::spawn_blocking(move || db.insert(key, &value.to_be_bytes()).map_err(io_err))
            .await
            .map_err(|e| WalError::BackendUnavailable(e.to_string()))??;
        Ok(())
    }
}

#[async_trait]
impl WalBackend for SledWalBackend {
    async fn append(&self, partition: &str, event: WalEvent) -> Result<SequenceNumber, WalError> {
        let db = self.db.clone();
        let partition = partition.to_string();
        let bytes = serde_json::to_vec(&event)
            .map_err(|e| WalError::BackendUnavailable(e.to_string()))?;
        tokio::task::spawn_blocking(move || {
            let seq_key = sequence_counter_key(&partition);
            let next = match db.get(&seq_key).map_err(io_err)? {
                Some(v) => u64::from_be_bytes(
                    v.as_ref()
                        .try_into()
                        .map_err(|_| WalError::BackendUnavailable("corrupt sequence counter".to_string()))?,
                ),
                None => 0,
            };
            db.insert(seq_key, &(next + 1).to_be_bytes()).map_err(io_err)?;
            db.insert(entry_key(&partition, next), bytes).map_err(io_err)?;
            Ok(next)
        })
        .await
        .map_err(|e| WalError::BackendUnavailable(e.to_string()))?
    }

    async fn range(&self, partition: &str) -> Result<Vec<WalEntry>, WalError> {
        let db = self.db.clone();
        let prefix = entry_prefix(partition);
        let prefix_len = prefix.len();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for item in db.scan_prefix(&prefix) {
                let (key, value) = item.map_err(io_err)?;
                let sequence = u64::from_be_bytes(
                    key[prefix_len..]
                        .try_into()
                        .map_err(|_| WalError::BackendUnavailable("corrupt entry key".to_string()))?,
                );
                let event: WalEvent = serde_json::from_slice(&value)
                    .map_err(|e| WalError::BackendUnavailable(e.to_string()))?;
                out.push(WalEntry { sequence, event });
            }
            Ok(out)
        })
        .await
        .map_err(|e| WalError::BackendUnavailable(e.to_string()))?
    }

    async fn create_group(&self, partition: &str, group: &str) -> Result<(), WalError> {
        let db = self.db.clone();
        let partition_owned = partition.to_string();
        let group_owned = group.to_string();
        tokio::task::spawn_blocking(move || {
            db.insert(group_marker_key(&partition_owned, &group_owned), &[] as &[u8])
                .map_err(io_err)?;
            let cursor = cursor_key(&partition_owned, &group_owned);
            if db.get(&cursor).map_err(io_err)?.is_none() {
                db.insert(cursor, &0u64.to_be_bytes()).map_err(io_err)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| WalError::BackendUnavailable(e.to_string()))?
    }

    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<WalEntry>, WalError> {
        if !self.group_exists(partition, group).await? {
            return Err(WalError::GroupNotFound(group.to_string()));
        }
        let entries = self.range(partition).await?;
        let cursor = self.cursor_value(partition, group).await? as usize;
        let end = (cursor + count).min(entries.len());
        let batch = entries.get(cursor..end).unwrap_or_default().to_vec();
        self.set_cursor(partition, group, end as u64).await?;
        Ok(batch)
    }

    async fn acknowledge(
        &self,
        partition: &str,
        group: &str,
        sequences: &[SequenceNumber],
    ) -> Result<usize, WalError> {
        if !self.group_exists(partition, group).await? {
            return Err(WalError::GroupNotFound(group.to_string()));
        }
        let db = self.db.clone();
        let partition = partition.to_string();
        let group = group.to_string();
        let sequences = sequences.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut newly_acked = 0usize;
            for sequence in sequences {
                let key = ack_key(&partition, &group, sequence);
                if db.get(&key).map_err(io_err)?.is_none() {
                    db.insert(key, &[] as &[u8]).map_err(io_err)?;
                    newly_acked += 1;
                }
            }
            Ok(newly_acked)
        })
        .await
        .map_err(|e| WalError::BackendUnavailable(e.to_string()))?
    }
}

#[cfg(test)]
mod sled_tests {
    use super::*;
    use fabric_types::{Fields, WalEventType};
    use chrono::Utc;

    fn event() -> WalEvent {
        WalEvent {
            event_id: "evt-1".to_string(),
            event_type: WalEventType::IntentReceived,
            tenant_id: "t1".to_string(),
            timestamp: Utc::now(),
            payload: Fields::new(),
        }
    }

    #[tokio::test]
    async fn append_then_range_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledWalBackend::open(dir.path()).unwrap();
        let seq = backend.append("wal:t1:2026-01-01", event()).await.unwrap();
        assert_eq!(seq, 0);
        let entries = backend.range("wal:t1:2026-01-01").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 0);
    }

    #[tokio::test]
    async fn consumer_group_cursor_persists_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledWalBackend::open(dir.path()).unwrap();
        for _ in 0..5 {
            backend.append("wal:t1:2026-01-01", event()).await.unwrap();
        }
        backend.create_group("wal:t1:2026-01-01", "g1").await.unwrap();

        let batch1 = backend.read_group("wal:t1:2026-01-01", "g1", 2).await.unwrap();
        assert_eq!(batch1.len(), 2);
        let batch2 = backend.read_group("wal:t1:2026-01-01", "g1", 10).await.unwrap();
        assert_eq!(batch2.len(), 3);

        let ids: Vec<SequenceNumber> = batch1.iter().map(|e| e.sequence).collect();
        let acked = backend.acknowledge("wal:t1:2026-01-01", "g1", &ids).await.unwrap();
        assert_eq!(acked, 2);
        let acked_again = backend.acknowledge("wal:t1:2026-01-01", "g1", &ids).await.unwrap();
        assert_eq!(acked_again, 0);
    }

    #[tokio::test]
    async fn read_group_on_unknown_group_errors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledWalBackend::open(dir.path()).unwrap();
        backend.append("wal:t1:2026-01-01", event()).await.unwrap();
        let result = backend.read_group("wal:t1:2026-01-01", "missing", 10).await;
        assert!(matches!(result, Err(WalError::GroupNotFound(_))));
    }
}
