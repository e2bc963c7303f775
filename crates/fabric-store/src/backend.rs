//! Pluggable key/value backends underlying the State Surface.
//!
//! A narrow async trait over an interchangeable backend, with an in-memory
//! and a `sled`-backed implementation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Narrow key/value abstraction a hot or durable backend implements.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Store `value` under `key`. `ttl` is honored by hot backends and
    /// ignored by durable ones (durable writes never expire).
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Fetch the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Remove `key`. Returns whether a value was actually present.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// List every live key starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// In-memory backend. Used directly in tests, as the fallback the
/// [`crate::StateSurface`] degrades to when `use_memory = true`, and as a
/// durable-tier stand-in when no `sled` path is configured.
#[derive(Default)]
pub struct InMemoryKvBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKvBackend {
    /// Construct an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live())
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Durable backend over an embedded `sled` database. TTLs are accepted for
/// interface parity but never applied: durable writes persist until
/// explicitly deleted.
pub struct SledKvBackend {
    db: sled::Db,
}

impl SledKvBackend {
    /// Open (creating if absent) a sled database rooted at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KvBackend for SledKvBackend {
    async fn put(&self, key: &str, value: Value, _ttl: Option<Duration>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&value).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || db.insert(key, bytes))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        let bytes = tokio::task::spawn_blocking(move || db.get(key))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .map_err(|e| StoreError::Io(e.to_string()))?;
        match bytes {
            Some(ivec) => {
                let value = serde_json::from_slice(&ivec)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        let removed = tokio::task::spawn_blocking(move || db.remove(key))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(removed.is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let db = self.db.clone();
        let prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || {
            db.scan_prefix(prefix.as_bytes())
                .keys()
                .filter_map(|r| r.ok())
                .map(|k| String::from_utf8_lossy(&k).into_owned())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_put_get_delete_roundtrips() {
        let backend = InMemoryKvBackend::new();
        backend.put("k1", serde_json::json!({"a": 1}), None).await.unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), Some(serde_json::json!({"a": 1})));
        assert!(backend.delete("k1").await.unwrap());
        assert_eq!(backend.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_ttl_expires() {
        let backend = InMemoryKvBackend::new();
        backend
            .put("k1", serde_json::json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_list_keys_filters_by_prefix() {
        let backend = InMemoryKvBackend::new();
        backend.put("execution:t1:e1", serde_json::json!(1), None).await.unwrap();
        backend.put("session:t1:s1", serde_json::json!(1), None).await.unwrap();
        let keys = backend.list_keys("execution:t1:").await.unwrap();
        assert_eq!(keys, vec!["execution:t1:e1".to_string()]);
    }

    #[tokio::test]
    async fn sled_put_get_delete_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledKvBackend::open(dir.path()).unwrap();
        backend.put("k1", serde_json::json!({"a": 1}), None).await.unwrap();
        assert_eq!(backend.get("k1").await.unwrap(), Some(serde_json::json!({"a": 1})));
        assert!(backend.delete("k1").await.unwrap());
        assert_eq!(backend.get("k1").await.unwrap(), None);
    }
}
