//! Content-addressed blob storage for artifact payloads and visuals.
//!
//! Payloads are canonically encoded with `rmp-serde` (MessagePack) before
//! being digested with `blake3`. The storage path is the digest; a
//! tenant-scoped index is kept alongside it purely so the Artifact Plane can
//! fall back to direct storage retrieval when the registry entry is missing.
//! Two implementations share the [`ArtifactStorage`] trait: an in-memory one
//! used as the default and in tests, and a `sled`-backed durable one.

use std::collections::HashMap;

use async_trait::async_trait;
use fabric_types::{ArtifactId, FabricError, TenantId};
use serde_json::Value;
use tokio::sync::RwLock;

/// Blob store backing the Artifact Plane.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Persist `payload`, returning its content-addressed storage path.
    /// Also indexes the blob under `(tenant_id, artifact_id)` for direct
    /// retrieval when the registry entry is absent.
    async fn put(
        &self,
        tenant_id: &TenantId,
        artifact_id: &ArtifactId,
        payload: &Value,
    ) -> Result<String, FabricError>;

    /// Fetch a payload by its storage path.
    async fn get(&self, storage_path: &str) -> Result<Option<Value>, FabricError>;

    /// Fetch a payload directly by `(tenant_id, artifact_id)`, bypassing the
    /// registry. Used only when the registry entry is missing.
    async fn get_by_artifact_id(
        &self,
        tenant_id: &TenantId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<Value>, FabricError>;
}

fn digest_of(payload: &Value) -> Result<(String, Vec<u8>), FabricError> {
    let bytes = rmp_serde::to_vec(payload)
        .map_err(|e| FabricError::validation(format!("payload is not encodable: {e}")))?;
    let digest = blake3::hash(&bytes).to_hex().to_string();
    Ok((digest, bytes))
}

/// In-memory content-addressed store. Default backend and test fixture.
#[derive(Default)]
pub struct InMemoryArtifactStorage {
    blobs: RwLock<HashMap<String, Value>>,
    by_artifact: RwLock<HashMap<(TenantId, ArtifactId), String>>,
}

impl InMemoryArtifactStorage {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStorage for InMemoryArtifactStorage {
    async fn put(
        &self,
        tenant_id: &TenantId,
        artifact_id: &ArtifactId,
        payload: &Value,
    ) -> Result<String, FabricError> {
        let (digest, _bytes) = digest_of(payload)?;
        let storage_path = format!("artifacts/{tenant_id}/{digest}");
        self.blobs.write().await.insert(storage_path.clone(), payload.clone());
        self.by_artifact
            .write()
            .await
            .insert((tenant_id.clone(), artifact_id.clone()), storage_path.clone());
        Ok(storage_path)
    }

    async fn get(&self, storage_path: &str) -> Result<Option<Value>, FabricError> {
        Ok(self.blobs.read().await.get(storage_path).cloned())
    }

    async fn get_by_artifact_id(
        &self,
        tenant_id: &TenantId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<Value>, FabricError> {
        let by_artifact = self.by_artifact.read().await;
        let Some(path) = by_artifact.get(&(tenant_id.clone(), artifact_id.clone())) else {
            return Ok(None);
        };
        self.get(path).await
    }
}

fn io_err(e: sled::Error) -> FabricError {
    FabricError::backend_unavailable(e.to_string())
}

const BLOB_PREFIX: &[u8] = b"b:";
const INDEX_PREFIX: &[u8] = b"i:";
const SEP: u8 = 0;

fn blob_key(storage_path: &str) -> Vec<u8> {
    let mut key = BLOB_PREFIX.to_vec();
    key.extend_from_slice(storage_path.as_bytes());
    key
}

fn index_key(tenant_id: &TenantId, artifact_id: &ArtifactId) -> Vec<u8> {
    let mut key = INDEX_PREFIX.to_vec();
    key.extend_from_slice(tenant_id.as_bytes());
    key.push(SEP);
    key.extend_from_slice(artifact_id.as_bytes());
    key
}

/// Durable content-addressed store over an embedded `sled` database. Blobs
/// and the tenant/artifact-id index live in the same tree under distinct key
/// prefixes, mirroring [`InMemoryArtifactStorage`]'s two-map layout.
pub struct SledArtifactStorage {
    db: sled::Db,
}

impl SledArtifactStorage {
    /// Open (creating if absent) a sled database rooted at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, FabricError> {
        let db = sled::open(path).map_err(io_err)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl ArtifactStorage for SledArtifactStorage {
    async fn put(
        &self,
        tenant_id: &TenantId,
        artifact_id: &ArtifactId,
        payload: &Value,
    ) -> Result<String, FabricError> {
        let (digest, _bytes) = digest_of(payload)?;
        let storage_path = format!("artifacts/{tenant_id}/{digest}");
        let blob_bytes =
            serde_json::to_vec(payload).map_err(|e| FabricError::validation(e.to_string()))?;

        let db = self.db.clone();
        let storage_path_owned = storage_path.clone();
        let index_key_bytes = index_key(tenant_id, artifact_id);
        tokio::task::spawn_blocking(move || {
            db.insert(blob_key(&storage_path_owned), blob_bytes).map_err(io_err)?;
            db.insert(index_key_bytes, storage_path_owned.as_bytes()).map_err(io_err)?;
            Ok(())
        })
        .await
        .map_err(|e| FabricError::backend_unavailable(e.to_string()))??;

        Ok(storage_path)
    }

    async fn get(&self, storage_path: &str) -> Result<Option<Value>, FabricError> {
        let db = self.db.clone();
        let key = blob_key(storage_path);
        let bytes = tokio::task::spawn_blocking(move || db.get(key).map_err(io_err))
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))??;
        match bytes {
            Some(v) => {
                let value = serde_json::from_slice(&v)
                    .map_err(|e| FabricError::backend_unavailable(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn get_by_artifact_id(
        &self,
        tenant_id: &TenantId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<Value>, FabricError> {
        let db = self.db.clone();
        let key = index_key(tenant_id, artifact_id);
        let path_bytes = tokio::task::spawn_blocking(move || db.get(key).map_err(io_err))
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))??;
        let Some(path_bytes) = path_bytes else {
            return Ok(None);
        };
        let storage_path = String::from_utf8_lossy(&path_bytes).into_owned();
        self.get(&storage_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn identical_payloads_share_a_storage_path() {
        let storage = InMemoryArtifactStorage::new();
        let payload = json!({"a": 1});
        let path_a = storage.put(&"t1".to_string(), &"art-1".to_string(), &payload).await.unwrap();
        let path_b = storage.put(&"t1".to_string(), &"art-2".to_string(), &payload).await.unwrap();
        assert_eq!(path_a, path_b);
    }

    #[tokio::test]
    async fn fallback_lookup_by_artifact_id_works() {
        let storage = InMemoryArtifactStorage::new();
        let payload = json!({"a": 1});
        storage.put(&"t1".to_string(), &"art-1".to_string(), &payload).await.unwrap();
        let fetched = storage
            .get_by_artifact_id(&"t1".to_string(), &"art-1".to_string())
            .await
            .unwrap();
        assert_eq!(fetched, Some(payload));
    }
}
