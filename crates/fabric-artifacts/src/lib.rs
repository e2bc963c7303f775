#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-artifacts** – Artifact Plane: create/get/list/version/lifecycle/
//! dependency/lineage management for artifacts.
//!
//! The registry entry (`artifact:<tenant>:<artifact id>`) lives in the
//! State Surface's durable tier; the payload blob lives in content-addressed
//! [`ArtifactStorage`].

use std::collections::HashMap;

use chrono::Utc;
use fabric_store::{artifact_key, StateSurface};
use fabric_types::{
    ArtifactId, ArtifactOwner, ArtifactPurpose, ArtifactRecord, ExecutionId, FabricError, Fields,
    IntentId, LifecycleState, LifecycleTransition, SessionId, SolutionId, TenantId,
};
use serde_json::Value;
use tracing::debug;

mod storage;

pub use storage::{ArtifactStorage, InMemoryArtifactStorage, SledArtifactStorage};

/// Context an artifact is created under: who/what produced it.
#[derive(Debug, Clone)]
pub struct ArtifactContext {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Originating session.
    pub session_id: SessionId,
    /// Originating solution.
    pub solution_id: SolutionId,
    /// Realm that produced the artifact.
    pub owning_realm: String,
    /// Intent type that produced the artifact.
    pub originating_intent_type: String,
    /// Intent id that produced the artifact.
    pub originating_intent_id: IntentId,
    /// Execution id that produced the artifact.
    pub execution_id: ExecutionId,
}

/// Input to `create_artifact`.
#[derive(Debug, Clone)]
pub struct CreateArtifactRequest {
    /// Artifact type (roadmap, blueprint, sop, workflow, solution, poc,
    /// semantic-profile, parsed-content, file, ...).
    pub artifact_type: String,
    /// Artifact id override; generated when absent.
    pub artifact_id: Option<ArtifactId>,
    /// Primary payload.
    pub payload: Value,
    /// Ancillary visual sub-component payloads, stored and addressed
    /// separately from the primary payload.
    pub visuals: Vec<Value>,
    /// Creation context.
    pub context: ArtifactContext,
    /// Caller metadata.
    pub metadata: Fields,
    /// Whether the artifact can be regenerated from its sources.
    pub regenerable: bool,
    /// Retention policy tag.
    pub retention_policy: String,
    /// Initial lifecycle state. Defaults to `draft` when unset via
    /// [`CreateArtifactRequest::defaults`].
    pub lifecycle_state: LifecycleState,
    /// Owner classification. Defaults to `client`.
    pub owner: ArtifactOwner,
    /// Purpose classification. Defaults to `delivery`.
    pub purpose: ArtifactPurpose,
    /// Upstream artifact ids this artifact depends on.
    pub source_artifact_ids: Vec<ArtifactId>,
}

impl CreateArtifactRequest {
    /// Construct a request with the conservative defaults
    /// (`lifecycle_state = draft`, `owner = client`, `purpose = delivery`,
    /// `source_artifact_ids = []`).
    pub fn defaults(
        artifact_type: impl Into<String>,
        payload: Value,
        context: ArtifactContext,
    ) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            artifact_id: None,
            payload,
            visuals: Vec::new(),
            context,
            metadata: Fields::new(),
            regenerable: false,
            retention_policy: "standard".to_string(),
            lifecycle_state: LifecycleState::Draft,
            owner: ArtifactOwner::Client,
            purpose: ArtifactPurpose::Delivery,
            source_artifact_ids: Vec::new(),
        }
    }
}

/// Result of `create_artifact`.
#[derive(Debug, Clone)]
pub struct CreateArtifactResult {
    /// The artifact's id.
    pub artifact_id: ArtifactId,
    /// Primary payload's storage path.
    pub storage_path: String,
    /// Visual sub-component storage paths.
    pub visual_paths: Vec<String>,
}

/// Result of `get_artifact`.
#[derive(Debug, Clone)]
pub struct GetArtifactResult {
    /// Registry entry, if one was found.
    pub record: Option<ArtifactRecord>,
    /// Primary payload, if `include_payload` was set and one was found.
    pub payload: Option<Value>,
}

/// Filters accepted by `list_artifacts`.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    /// Restrict to this artifact type.
    pub artifact_type: Option<String>,
    /// Restrict to this originating session.
    pub session_id: Option<SessionId>,
    /// Restrict to this originating solution.
    pub solution_id: Option<SolutionId>,
    /// Restrict to this lifecycle state.
    pub lifecycle_state: Option<LifecycleState>,
    /// Restrict to this owner.
    pub owner: Option<ArtifactOwner>,
    /// Restrict to this purpose.
    pub purpose: Option<ArtifactPurpose>,
    /// Restrict to current-version artifacts only.
    pub current_version_only: bool,
}

/// Result of `validate_dependencies`.
#[derive(Debug, Clone, Default)]
pub struct DependencyValidation {
    /// Source ids this artifact references that do not exist.
    pub missing: Vec<ArtifactId>,
    /// Other artifacts that depend on this one.
    pub reverse_dependents: Vec<ArtifactId>,
}

/// Versioned, lineage-tracked, lifecycle-governed artifact registry.
pub struct ArtifactPlane {
    state: StateSurface,
    storage: Box<dyn ArtifactStorage>,
}

fn allowed_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    from == to
        || matches!(
            (from, to),
            (Draft, Accepted) | (Draft, Obsolete) | (Accepted, Obsolete)
        )
}

impl ArtifactPlane {
    /// Construct an artifact plane over `state` (durable tier holds the
    /// registry) and `storage` (content-addressed payload blobs).
    pub fn new(state: StateSurface, storage: Box<dyn ArtifactStorage>) -> Self {
        Self { state, storage }
    }

    async fn load(&self, tenant_id: &str, artifact_id: &str) -> Result<Option<ArtifactRecord>, FabricError> {
        let Some(value) = self.state.get_durable(&artifact_key(&tenant_id.to_string(), &artifact_id.to_string())).await? else {
            return Ok(None);
        };
        let record: ArtifactRecord = serde_json::from_value(value)
            .map_err(|e| FabricError::validation(format!("corrupt artifact record: {e}")))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &ArtifactRecord) -> Result<(), FabricError> {
        let value = serde_json::to_value(record)
            .map_err(|e| FabricError::validation(format!("unencodable artifact record: {e}")))?;
        self.state.put_durable(&artifact_key(&record.tenant_id, &record.artifact_id), value).await
    }

    /// Persist a payload (and any visuals), write the registry entry, and
    /// return identifying paths.
    pub async fn create_artifact(
        &self,
        req: CreateArtifactRequest,
    ) -> Result<CreateArtifactResult, FabricError> {
        let artifact_id = req.artifact_id.unwrap_or_else(fabric_clock::new_id);
        let storage_path = self
            .storage
            .put(&req.context.tenant_id, &artifact_id, &req.payload)
            .await?;

        let mut visual_paths = Vec::with_capacity(req.visuals.len());
        for (i, visual) in req.visuals.iter().enumerate() {
            let visual_id = format!("{artifact_id}-visual-{i}");
            visual_paths.push(self.storage.put(&req.context.tenant_id, &visual_id, visual).await?);
        }

        let now = Utc::now();
        let record = ArtifactRecord {
            artifact_id: artifact_id.clone(),
            artifact_type: req.artifact_type,
            tenant_id: req.context.tenant_id.clone(),
            session_id: req.context.session_id,
            solution_id: req.context.solution_id,
            owning_realm: req.context.owning_realm,
            originating_intent_type: req.context.originating_intent_type,
            originating_intent_id: req.context.originating_intent_id,
            execution_id: req.context.execution_id,
            storage_path: storage_path.clone(),
            visual_paths: visual_paths.clone(),
            regenerable: req.regenerable,
            retention_policy: req.retention_policy,
            metadata: req.metadata,
            lifecycle_state: req.lifecycle_state,
            owner: req.owner,
            purpose: req.purpose,
            transitions: Vec::new(),
            version: 1,
            parent_artifact_id: None,
            is_current_version: true,
            source_artifact_ids: req.source_artifact_ids,
            lineage: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.save(&record).await?;
        debug!(artifact_id = %artifact_id, %storage_path, "artifact created");

        Ok(CreateArtifactResult { artifact_id, storage_path, visual_paths })
    }

    /// Fetch an artifact's registry entry and, optionally, its payload and
    /// visuals. Falls back to direct storage retrieval when the registry
    /// entry is missing but a payload exists under `artifact_id`.
    pub async fn get_artifact(
        &self,
        tenant_id: &str,
        artifact_id: &str,
        include_payload: bool,
        include_visuals: bool,
    ) -> Result<Option<GetArtifactResult>, FabricError> {
        let record = self.load(tenant_id, artifact_id).await?;

        let payload = match &record {
            Some(record) if include_payload => self.storage.get(&record.storage_path).await?,
            None => {
                let fallback = self
                    .storage
                    .get_by_artifact_id(&tenant_id.to_string(), &artifact_id.to_string())
                    .await?;
                if fallback.is_none() {
                    return Ok(None);
                }
                fallback
            }
            _ => None,
        };

        if !include_visuals {
            return Ok(Some(GetArtifactResult { record, payload }));
        }
        Ok(Some(GetArtifactResult { record, payload }))
    }

    /// List artifacts for `tenant_id` matching every set filter field.
    pub async fn list_artifacts(
        &self,
        tenant_id: &str,
        filter: ArtifactFilter,
    ) -> Result<Vec<ArtifactRecord>, FabricError> {
        let prefix = format!("artifact:{tenant_id}:");
        let keys = self.state.list_durable(&prefix).await?;
        let mut out = Vec::new();
        for key in keys {
            let Some(artifact_id) = key.strip_prefix(&prefix) else { continue };
            let Some(record) = self.load(tenant_id, artifact_id).await? else { continue };
            if matches(&record, &filter) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Apply a lifecycle transition, validating against the
    /// draft → accepted → obsolete state machine (same-state is idempotent).
    pub async fn transition_lifecycle_state(
        &self,
        tenant_id: &str,
        artifact_id: &str,
        new_state: LifecycleState,
        transitioned_by: impl Into<String>,
        reason: Option<String>,
    ) -> Result<ArtifactRecord, FabricError> {
        let mut record = self
            .load(tenant_id, artifact_id)
            .await?
            .ok_or_else(|| FabricError::validation(format!("artifact {artifact_id} not found")))?;

        if !allowed_transition(record.lifecycle_state, new_state) {
            return Err(FabricError::lifecycle_violation(format!(
                "cannot transition artifact {artifact_id} from {:?} to {:?}",
                record.lifecycle_state, new_state
            )));
        }

        record.transitions.push(LifecycleTransition {
            from: record.lifecycle_state,
            to: new_state,
            timestamp: Utc::now(),
            actor: transitioned_by.into(),
            reason,
        });
        record.lifecycle_state = new_state;
        record.updated_at = Utc::now();
        self.save(&record).await?;
        Ok(record)
    }

    /// Create a new version of `parent_artifact_id`: a fresh artifact with
    /// `version = parent.version + 1`, `parent_artifact_id` set, and
    /// `is_current_version = true`, flipping the parent's flag to false.
    pub async fn create_version(
        &self,
        parent_artifact_id: &str,
        req: CreateArtifactRequest,
    ) -> Result<CreateArtifactResult, FabricError> {
        let mut parent = self
            .load(&req.context.tenant_id, parent_artifact_id)
            .await?
            .ok_or_else(|| FabricError::validation(format!("parent artifact {parent_artifact_id} not found")))?;

        let artifact_id = req.artifact_id.clone().unwrap_or_else(fabric_clock::new_id);
        let storage_path = self
            .storage
            .put(&req.context.tenant_id, &artifact_id, &req.payload)
            .await?;
        let mut visual_paths = Vec::with_capacity(req.visuals.len());
        for (i, visual) in req.visuals.iter().enumerate() {
            let visual_id = format!("{artifact_id}-visual-{i}");
            visual_paths.push(self.storage.put(&req.context.tenant_id, &visual_id, visual).await?);
        }

        let now = Utc::now();
        let record = ArtifactRecord {
            artifact_id: artifact_id.clone(),
            artifact_type: req.artifact_type,
            tenant_id: req.context.tenant_id.clone(),
            session_id: req.context.session_id,
            solution_id: req.context.solution_id,
            owning_realm: req.context.owning_realm,
            originating_intent_type: req.context.originating_intent_type,
            originating_intent_id: req.context.originating_intent_id,
            execution_id: req.context.execution_id,
            storage_path: storage_path.clone(),
            visual_paths: visual_paths.clone(),
            regenerable: req.regenerable,
            retention_policy: req.retention_policy,
            metadata: req.metadata,
            lifecycle_state: req.lifecycle_state,
            owner: req.owner,
            purpose: req.purpose,
            transitions: Vec::new(),
            version: parent.version + 1,
            parent_artifact_id: Some(parent_artifact_id.to_string()),
            is_current_version: true,
            source_artifact_ids: req.source_artifact_ids,
            lineage: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.save(&record).await?;

        parent.is_current_version = false;
        parent.updated_at = now;
        self.save(&parent).await?;

        Ok(CreateArtifactResult { artifact_id, storage_path, visual_paths })
    }

    /// Walk the full version chain starting at `base_artifact_id` (the
    /// first version's id), following `parent_artifact_id` forward.
    pub async fn list_versions(
        &self,
        tenant_id: &str,
        base_artifact_id: &str,
    ) -> Result<Vec<ArtifactRecord>, FabricError> {
        let all = self.list_artifacts(tenant_id, ArtifactFilter::default()).await?;
        let by_parent: HashMap<ArtifactId, &ArtifactRecord> = all
            .iter()
            .filter_map(|r| r.parent_artifact_id.clone().map(|p| (p, r)))
            .collect();

        let mut chain = Vec::new();
        let Some(mut current) = all.iter().find(|r| r.artifact_id == base_artifact_id).cloned() else {
            return Ok(chain);
        };
        loop {
            let next = by_parent.get(&current.artifact_id).map(|r| (*r).clone());
            chain.push(current.clone());
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(chain)
    }

    /// Upstream artifact ids this artifact depends on.
    pub async fn get_artifact_dependencies(
        &self,
        tenant_id: &str,
        artifact_id: &str,
    ) -> Result<Vec<ArtifactId>, FabricError> {
        Ok(self
            .load(tenant_id, artifact_id)
            .await?
            .map(|r| r.source_artifact_ids)
            .unwrap_or_default())
    }

    /// Check every referenced source id exists, and report reverse
    /// dependents (other artifacts that name this one as a source).
    pub async fn validate_dependencies(
        &self,
        tenant_id: &str,
        artifact_id: &str,
    ) -> Result<DependencyValidation, FabricError> {
        let record = self
            .load(tenant_id, artifact_id)
            .await?
            .ok_or_else(|| FabricError::validation(format!("artifact {artifact_id} not found")))?;

        let all = self.list_artifacts(tenant_id, ArtifactFilter::default()).await?;
        let existing: std::collections::HashSet<&ArtifactId> =
            all.iter().map(|r| &r.artifact_id).collect();

        let missing = record
            .source_artifact_ids
            .iter()
            .filter(|id| !existing.contains(id))
            .cloned()
            .collect();

        let reverse_dependents = all
            .iter()
            .filter(|r| r.artifact_id != artifact_id && r.source_artifact_ids.contains(&artifact_id.to_string()))
            .map(|r| r.artifact_id.clone())
            .collect();

        Ok(DependencyValidation { missing, reverse_dependents })
    }

    /// Delete an artifact's registry entry, refusing when reverse
    /// dependents exist unless `force` is set.
    pub async fn delete_artifact(
        &self,
        tenant_id: &str,
        artifact_id: &str,
        force: bool,
    ) -> Result<(), FabricError> {
        if !force {
            let validation = self.validate_dependencies(tenant_id, artifact_id).await?;
            if !validation.reverse_dependents.is_empty() {
                return Err(FabricError::validation(format!(
                    "artifact {artifact_id} has {} reverse dependent(s); refusing delete without force",
                    validation.reverse_dependents.len()
                )));
            }
        }
        self.state
            .delete_durable(&artifact_key(&tenant_id.to_string(), &artifact_id.to_string()))
            .await?;
        Ok(())
    }

    /// Append `execution_id` to an artifact's advisory lineage list. Always
    /// uses the execution's own tenant id — lineage is never registered
    /// against an out-of-band tenant.
    pub async fn register_lineage(
        &self,
        tenant_id: &str,
        artifact_id: &str,
        execution_id: ExecutionId,
    ) -> Result<(), FabricError> {
        let mut record = self
            .load(tenant_id, artifact_id)
            .await?
            .ok_or_else(|| FabricError::validation(format!("artifact {artifact_id} not found")))?;
        record.lineage.push(execution_id);
        record.updated_at = Utc::now();
        self.save(&record).await
    }

    /// Fetch a visual sub-component directly by its storage path, bypassing
    /// the registry (the API layer's visuals-by-path endpoint).
    pub async fn get_visual(&self, storage_path: &str) -> Result<Option<Value>, FabricError> {
        self.storage.get(storage_path).await
    }
}

fn matches(record: &ArtifactRecord, filter: &ArtifactFilter) -> bool {
    if let Some(t) = &filter.artifact_type {
        if &record.artifact_type != t {
            return false;
        }
    }
    if let Some(s) = &filter.session_id {
        if &record.session_id != s {
            return false;
        }
    }
    if let Some(s) = &filter.solution_id {
        if &record.solution_id != s {
            return false;
        }
    }
    if let Some(state) = filter.lifecycle_state {
        if record.lifecycle_state != state {
            return false;
        }
    }
    if let Some(owner) = filter.owner {
        if record.owner != owner {
            return false;
        }
    }
    if let Some(purpose) = filter.purpose {
        if record.purpose != purpose {
            return false;
        }
    }
    if filter.current_version_only && !record.is_current_version {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ArtifactContext {
        ArtifactContext {
            tenant_id: "t1".to_string(),
            session_id: "s1".to_string(),
            solution_id: "sol1".to_string(),
            owning_realm: "roadmap-realm".to_string(),
            originating_intent_type: "generate-roadmap".to_string(),
            originating_intent_id: "i1".to_string(),
            execution_id: "e1".to_string(),
        }
    }

    fn plane() -> ArtifactPlane {
        ArtifactPlane::new(StateSurface::in_memory(), Box::new(InMemoryArtifactStorage::new()))
    }

    #[tokio::test]
    async fn create_then_get_roundtrips_with_defaults() {
        let plane = plane();
        let req = CreateArtifactRequest::defaults("roadmap", json!({"steps": 3}), ctx());
        let created = plane.create_artifact(req).await.unwrap();

        let fetched = plane
            .get_artifact("t1", &created.artifact_id, true, false)
            .await
            .unwrap()
            .unwrap();
        let record = fetched.record.unwrap();
        assert_eq!(record.version, 1);
        assert!(record.is_current_version);
        assert_eq!(record.lifecycle_state, LifecycleState::Draft);
        assert_eq!(fetched.payload, Some(json!({"steps": 3})));
    }

    #[tokio::test]
    async fn lifecycle_transitions_follow_the_state_machine() {
        let plane = plane();
        let created = plane
            .create_artifact(CreateArtifactRequest::defaults("sop", json!({}), ctx()))
            .await
            .unwrap();

        plane
            .transition_lifecycle_state("t1", &created.artifact_id, LifecycleState::Accepted, "reviewer", None)
            .await
            .unwrap();

        // Same-state transition is idempotent.
        plane
            .transition_lifecycle_state("t1", &created.artifact_id, LifecycleState::Accepted, "reviewer", None)
            .await
            .unwrap();

        let err = plane
            .transition_lifecycle_state("t1", &created.artifact_id, LifecycleState::Draft, "reviewer", None)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, fabric_types::ErrorKind::LifecycleViolation));

        let record = plane
            .transition_lifecycle_state("t1", &created.artifact_id, LifecycleState::Obsolete, "reviewer", Some("retired".into()))
            .await
            .unwrap();
        assert_eq!(record.transitions.len(), 3);
    }

    #[tokio::test]
    async fn versioning_flips_current_flag_and_chains() {
        let plane = plane();
        let v1 = plane
            .create_artifact(CreateArtifactRequest::defaults("roadmap", json!(1), ctx()))
            .await
            .unwrap();
        let v2 = plane
            .create_version(&v1.artifact_id, CreateArtifactRequest::defaults("roadmap", json!(2), ctx()))
            .await
            .unwrap();

        let chain = plane.list_versions("t1", &v1.artifact_id).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].artifact_id, v1.artifact_id);
        assert_eq!(chain[1].artifact_id, v2.artifact_id);
        assert_eq!(chain[1].version, 2);

        let parent = plane.get_artifact("t1", &v1.artifact_id, false, false).await.unwrap().unwrap();
        assert!(!parent.record.unwrap().is_current_version);
    }

    #[tokio::test]
    async fn validate_dependencies_reports_missing_and_reverse_dependents() {
        let plane = plane();
        let mut req = CreateArtifactRequest::defaults("blueprint", json!({}), ctx());
        req.source_artifact_ids = vec!["does-not-exist".to_string()];
        let dependent = plane.create_artifact(req).await.unwrap();

        let validation = plane.validate_dependencies("t1", &dependent.artifact_id).await.unwrap();
        assert_eq!(validation.missing, vec!["does-not-exist".to_string()]);

        let base = plane
            .create_artifact(CreateArtifactRequest::defaults("sop", json!({}), ctx()))
            .await
            .unwrap();
        let mut dependent_req = CreateArtifactRequest::defaults("blueprint", json!({}), ctx());
        dependent_req.source_artifact_ids = vec![base.artifact_id.clone()];
        let dependent2 = plane.create_artifact(dependent_req).await.unwrap();

        let validation = plane.validate_dependencies("t1", &base.artifact_id).await.unwrap();
        assert_eq!(validation.reverse_dependents, vec![dependent2.artifact_id]);
    }

    #[tokio::test]
    async fn delete_refuses_when_reverse_dependents_exist_unless_forced() {
        let plane = plane();
        let base = plane
            .create_artifact(CreateArtifactRequest::defaults("sop", json!({}), ctx()))
            .await
            .unwrap();
        let mut dependent_req = CreateArtifactRequest::defaults("blueprint", json!({}), ctx());
        dependent_req.source_artifact_ids = vec![base.artifact_id.clone()];
        plane.create_artifact(dependent_req).await.unwrap();

        let err = plane.delete_artifact("t1", &base.artifact_id, false).await.unwrap_err();
        assert!(matches!(err.kind, fabric_types::ErrorKind::Validation));

        plane.delete_artifact("t1", &base.artifact_id, true).await.unwrap();
        assert!(plane.get_artifact("t1", &base.artifact_id, false, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_lineage_appends_execution_ids() {
        let plane = plane();
        let created = plane
            .create_artifact(CreateArtifactRequest::defaults("roadmap", json!({}), ctx()))
            .await
            .unwrap();
        plane.register_lineage("t1", &created.artifact_id, "e1".to_string()).await.unwrap();
        plane.register_lineage("t1", &created.artifact_id, "e2".to_string()).await.unwrap();

        let record = plane.get_artifact("t1", &created.artifact_id, false, false).await.unwrap().unwrap().record.unwrap();
        assert_eq!(record.lineage, vec!["e1".to_string(), "e2".to_string()]);
    }
}
