#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-store** – State Surface: tenant-scoped key/value API with
//! hot/durable backend routing.
//!
//! Key namespace is `<resource-kind>:<tenant id>:<resource id>`. Every read
//! and write is tenant-scoped by construction — the tenant id is always part
//! of the key, so no code path can observe another tenant's keys even with a
//! colliding resource id. Boundary-contract rule §8A governs backend
//! absence: without `use_memory = true`, an absent backend makes the surface
//! raise rather than degrade silently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fabric_types::{ArtifactId, ExecutionId, FabricError, Fields, SessionId, TenantId};
use serde_json::{json, Value};
use tracing::debug;

mod backend;
mod error;

pub use backend::{InMemoryKvBackend, KvBackend, SledKvBackend};
pub use error::StoreError;

/// Tenant placeholder an anonymous session's state is namespaced under
/// before it is upgraded to a real tenant.
pub const ANONYMOUS_TENANT: &str = "__anonymous__";

const EXECUTION_TTL: Duration = Duration::from_secs(3600);
const SESSION_TTL: Duration = Duration::from_secs(86_400);
const FILE_TTL: Duration = Duration::from_secs(86_400);

/// Which tier(s) a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Low-latency KV with a TTL. Reads check here first.
    Hot,
    /// Document store without a TTL.
    Durable,
    /// Both: hot for fast reads, durable for retention.
    Tiered,
}

/// Metadata about file content, returned by `get_file_metadata`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct StoredFileMetadata {
    /// Original filename.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// blake3 content hash, hex-encoded.
    pub content_hash: String,
    /// Caller-supplied metadata.
    pub metadata: Fields,
    /// Creation timestamp, RFC3339.
    pub created_at: String,
}

/// Centralized recording of execution, session, and file state.
pub struct StateSurface {
    hot: Option<Arc<dyn KvBackend>>,
    durable: Option<Arc<dyn KvBackend>>,
    use_memory: bool,
    memory_hot: Arc<InMemoryKvBackend>,
    memory_durable: Arc<InMemoryKvBackend>,
}

impl StateSurface {
    /// Construct a state surface over optional hot/durable backends.
    ///
    /// `use_memory` is the explicit test-only opt-in for falling back to an
    /// in-memory backend when `hot`/`durable` are absent; without it, an
    /// absent backend is a §8A failure.
    pub fn new(
        hot: Option<Arc<dyn KvBackend>>,
        durable: Option<Arc<dyn KvBackend>>,
        use_memory: bool,
    ) -> Self {
        Self {
            hot,
            durable,
            use_memory,
            memory_hot: Arc::new(InMemoryKvBackend::new()),
            memory_durable: Arc::new(InMemoryKvBackend::new()),
        }
    }

    /// Construct a state surface backed purely by in-memory storage (tests).
    pub fn in_memory() -> Self {
        Self::new(None, None, true)
    }

    fn resolve_hot(&self) -> Result<Arc<dyn KvBackend>, FabricError> {
        match &self.hot {
            Some(backend) => Ok(backend.clone()),
            None if self.use_memory => Ok(self.memory_hot.clone() as Arc<dyn KvBackend>),
            None => Err(FabricError::contract_8a("hot state backend")),
        }
    }

    fn resolve_durable(&self) -> Result<Arc<dyn KvBackend>, FabricError> {
        match &self.durable {
            Some(backend) => Ok(backend.clone()),
            None if self.use_memory => Ok(self.memory_durable.clone() as Arc<dyn KvBackend>),
            None => Err(FabricError::contract_8a("durable state backend")),
        }
    }

    async fn put(&self, key: &str, mut state: Fields, strategy: Strategy) -> Result<(), FabricError> {
        state.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));
        let value = Value::Object(state.into_iter().collect());
        if matches!(strategy, Strategy::Hot | Strategy::Tiered) {
            self.resolve_hot()?
                .put(key, value.clone(), Some(EXECUTION_TTL))
                .await
                .map_err(|e| FabricError::backend_unavailable(e.to_string()))?;
        }
        if matches!(strategy, Strategy::Durable | Strategy::Tiered) {
            self.resolve_durable()?
                .put(key, value, None)
                .await
                .map_err(|e| FabricError::backend_unavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>, FabricError> {
        if let Some(value) = self
            .resolve_hot()?
            .get(key)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))?
        {
            return Ok(as_fields(value));
        }
        // Hot miss: fall through to durable. Found-in-durable values are not
        // rehydrated into hot — rehydration is a policy decision, not a
        // contract.
        match self.durable.as_ref() {
            Some(durable) => Ok(durable
                .get(key)
                .await
                .map_err(|e| FabricError::backend_unavailable(e.to_string()))?
                .and_then(as_fields)),
            None if self.use_memory => Ok(self
                .memory_durable
                .get(key)
                .await
                .map_err(|e| FabricError::backend_unavailable(e.to_string()))?
                .and_then(as_fields)),
            None => Ok(None),
        }
    }

    /// Fetch execution state for `(tenant_id, execution_id)`.
    pub async fn get_execution_state(
        &self,
        tenant_id: &str,
        execution_id: &str,
    ) -> Result<Option<Fields>, FabricError> {
        self.get(&execution_key(tenant_id, execution_id)).await
    }

    /// Store execution state, hot with a 1-hour TTL by default.
    pub async fn set_execution_state(
        &self,
        tenant_id: &str,
        execution_id: &str,
        state: Fields,
        strategy: Strategy,
    ) -> Result<(), FabricError> {
        self.put(&execution_key(tenant_id, execution_id), state, strategy).await
    }

    /// Fetch session state for `(tenant_id, session_id)`.
    pub async fn get_session_state(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Option<Fields>, FabricError> {
        self.get(&session_key(tenant_id, session_id)).await
    }

    /// Store session state, hot with a 24-hour TTL by default.
    pub async fn set_session_state(
        &self,
        tenant_id: &str,
        session_id: &str,
        state: Fields,
        strategy: Strategy,
    ) -> Result<(), FabricError> {
        self.put(&session_key(tenant_id, session_id), state, strategy).await
    }

    /// Delete `<key_prefix>:<tenant_id>:<resource_id>` from every tier it's
    /// present in. Returns whether anything was actually deleted.
    pub async fn delete_state(
        &self,
        key_prefix: &str,
        tenant_id: &str,
        resource_id: &str,
    ) -> Result<bool, FabricError> {
        let key = format!("{key_prefix}:{tenant_id}:{resource_id}");
        let mut deleted = false;
        if let Ok(hot) = self.resolve_hot() {
            deleted |= hot
                .delete(&key)
                .await
                .map_err(|e| FabricError::backend_unavailable(e.to_string()))?;
        }
        if let Ok(durable) = self.resolve_durable() {
            deleted |= durable
                .delete(&key)
                .await
                .map_err(|e| FabricError::backend_unavailable(e.to_string()))?;
        }
        Ok(deleted)
    }

    /// List execution ids recorded for `tenant_id`, most-recently-written
    /// first is not guaranteed — backends list in their own native order.
    pub async fn list_executions(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionId>, FabricError> {
        let prefix = format!("execution:{tenant_id}:");
        let keys = self
            .resolve_hot()?
            .list_keys(&prefix)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .take(limit)
            .collect())
    }

    /// Store a file's bytes under a fresh opaque reference, hot with a
    /// 24-hour TTL.
    pub async fn store_file(
        &self,
        tenant_id: &str,
        session_id: &str,
        file_data: &[u8],
        filename: &str,
        metadata: Fields,
    ) -> Result<String, FabricError> {
        let file_id = fabric_clock::new_id();
        let file_ref = format!("file:{tenant_id}:{session_id}:{file_id}");
        let content_hash = blake3::hash(file_data).to_hex().to_string();

        let mut state = Fields::new();
        state.insert("file_data".into(), json!(file_data));
        state.insert("filename".into(), json!(filename));
        state.insert("file_hash".into(), json!(content_hash));
        state.insert("size".into(), json!(file_data.len() as u64));
        state.insert("metadata".into(), Value::Object(metadata.into_iter().collect()));
        state.insert("created_at".into(), json!(Utc::now().to_rfc3339()));

        self.resolve_hot()?
            .put(&file_ref, Value::Object(state.into_iter().collect()), Some(FILE_TTL))
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))?;

        debug!(file_ref = %file_ref, bytes = file_data.len(), "file stored in state surface");
        Ok(file_ref)
    }

    /// Fetch a file's raw bytes by reference.
    pub async fn get_file(&self, file_reference: &str) -> Result<Option<Vec<u8>>, FabricError> {
        let Some(state) = self
            .resolve_hot()?
            .get(file_reference)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        Ok(state
            .get("file_data")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|b| b.as_u64().map(|n| n as u8)).collect()))
    }

    /// Fetch a file's metadata without its bytes.
    pub async fn get_file_metadata(
        &self,
        file_reference: &str,
    ) -> Result<Option<StoredFileMetadata>, FabricError> {
        let Some(state) = self
            .resolve_hot()?
            .get(file_reference)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        let metadata = state
            .get("metadata")
            .and_then(|v| v.as_object())
            .map(|m| m.clone().into_iter().collect())
            .unwrap_or_default();
        Ok(Some(StoredFileMetadata {
            filename: state.get("filename").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            size: state.get("size").and_then(|v| v.as_u64()).unwrap_or_default(),
            content_hash: state.get("file_hash").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            metadata,
            created_at: state.get("created_at").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        }))
    }

    /// Delete a file by reference.
    pub async fn delete_file(&self, file_reference: &str) -> Result<bool, FabricError> {
        self.resolve_hot()?
            .delete(file_reference)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))
    }

    /// Write a durable-only registry entry (used by the Artifact Plane for
    /// `artifact:<tenant>:<artifact id>` entries, which never expire).
    pub async fn put_durable(&self, key: &str, value: Value) -> Result<(), FabricError> {
        self.resolve_durable()?
            .put(key, value, None)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))
    }

    /// Read a durable-only entry.
    pub async fn get_durable(&self, key: &str) -> Result<Option<Value>, FabricError> {
        self.resolve_durable()?
            .get(key)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))
    }

    /// Delete a durable-only entry.
    pub async fn delete_durable(&self, key: &str) -> Result<bool, FabricError> {
        self.resolve_durable()?
            .delete(key)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))
    }

    /// List durable keys with `prefix`.
    pub async fn list_durable(&self, prefix: &str) -> Result<Vec<String>, FabricError> {
        self.resolve_durable()?
            .list_keys(prefix)
            .await
            .map_err(|e| FabricError::backend_unavailable(e.to_string()))
    }
}

fn as_fields(value: Value) -> Option<Fields> {
    value.as_object().map(|m| m.clone().into_iter().collect())
}

fn execution_key(tenant_id: &str, execution_id: &str) -> String {
    format!("execution:{tenant_id}:{execution_id}")
}

fn session_key(tenant_id: &str, session_id: &str) -> String {
    format!("session:{tenant_id}:{session_id}")
}

/// Artifact registry key, shared with `fabric-artifacts`.
pub fn artifact_key(tenant_id: &TenantId, artifact_id: &ArtifactId) -> String {
    format!("artifact:{tenant_id}:{artifact_id}")
}

/// Session key namespaced under the anonymous placeholder tenant.
pub fn anonymous_session_key(session_id: &SessionId) -> String {
    session_key(ANONYMOUS_TENANT, session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn execution_state_roundtrips() {
        let surface = StateSurface::in_memory();
        surface
            .set_execution_state("t1", "e1", fields(&[("status", json!("running"))]), Strategy::Hot)
            .await
            .unwrap();
        let state = surface.get_execution_state("t1", "e1").await.unwrap().unwrap();
        assert_eq!(state.get("status").unwrap(), &json!("running"));
        assert!(state.contains_key("updated_at"));
    }

    #[tokio::test]
    async fn tenant_isolation_same_resource_id() {
        let surface = StateSurface::in_memory();
        surface
            .set_execution_state("t1", "e1", fields(&[("owner", json!("t1"))]), Strategy::Hot)
            .await
            .unwrap();
        let cross_tenant = surface.get_execution_state("t2", "e1").await.unwrap();
        assert!(cross_tenant.is_none());
    }

    #[tokio::test]
    async fn durable_write_is_visible_on_hot_miss() {
        let surface = StateSurface::in_memory();
        surface
            .set_execution_state("t1", "e1", fields(&[("status", json!("done"))]), Strategy::Durable)
            .await
            .unwrap();
        let state = surface.get_execution_state("t1", "e1").await.unwrap().unwrap();
        assert_eq!(state.get("status").unwrap(), &json!("done"));
    }

    #[tokio::test]
    async fn without_use_memory_missing_backend_is_contract_8a() {
        let surface = StateSurface::new(None, None, false);
        let err = surface
            .set_execution_state("t1", "e1", Fields::new(), Strategy::Hot)
            .await
            .unwrap_err();
        assert!(err.is_contract_8a());
    }

    #[tokio::test]
    async fn list_executions_scopes_by_tenant() {
        let surface = StateSurface::in_memory();
        surface.set_execution_state("t1", "e1", Fields::new(), Strategy::Hot).await.unwrap();
        surface.set_execution_state("t1", "e2", Fields::new(), Strategy::Hot).await.unwrap();
        surface.set_execution_state("t2", "e3", Fields::new(), Strategy::Hot).await.unwrap();

        let mut ids = surface.list_executions("t1", 10).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[tokio::test]
    async fn file_roundtrips_through_store_get_metadata_delete() {
        let surface = StateSurface::in_memory();
        let data = b"hello fabric".to_vec();
        let file_ref = surface
            .store_file("t1", "s1", &data, "hello.txt", Fields::new())
            .await
            .unwrap();

        assert_eq!(surface.get_file(&file_ref).await.unwrap(), Some(data.clone()));
        let meta = surface.get_file_metadata(&file_ref).await.unwrap().unwrap();
        assert_eq!(meta.filename, "hello.txt");
        assert_eq!(meta.size, data.len() as u64);
        assert_eq!(meta.content_hash, blake3::hash(&data).to_hex().to_string());

        assert!(surface.delete_file(&file_ref).await.unwrap());
        assert_eq!(surface.get_file(&file_ref).await.unwrap(), None);
    }

    proptest! {
        #[test]
        fn tenant_never_observes_another_tenants_state(
            tenant_a in "[a-z]{3,8}",
            tenant_b in "[a-z]{3,8}",
            resource_id in "[a-z0-9]{3,8}",
        ) {
            prop_assume!(tenant_a != tenant_b);
            let rt = tokio::runtime::Runtime::new().unwrap();
            let seen = rt.block_on(async {
                let surface = StateSurface::in_memory();
                surface
                    .set_execution_state(&tenant_a, &resource_id, Fields::new(), Strategy::Hot)
                    .await
                    .unwrap();
                surface.get_execution_state(&tenant_b, &resource_id).await.unwrap()
            });
            prop_assert!(seen.is_none());
        }
    }
}
