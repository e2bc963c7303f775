#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-kernel** – Intent Registry, Realm Registry & SDK, Execution
//! Lifecycle Manager, and Session Manager: the heart of the fabric. An
//! accepted intent moves through a WAL-first, state-surface-updated,
//! outbox-drained pipeline on its way to becoming a durable, observable
//! execution.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use fabric_artifacts::{ArtifactContext, ArtifactPlane, CreateArtifactRequest};
use fabric_bus::WriteAheadLog;
use fabric_outbox::Outbox;
use fabric_steward::{BoundaryContract, DataSteward};
use fabric_store::{StateSurface, Strategy};
use fabric_types::{
    ArtifactRef, ErrorKind, ExecutionId, ExecutionResult, FabricError, Fields, Intent, SessionId,
    TenantId, WalEventType,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, warn};

mod realm;
mod session;

pub use realm::{HandlerOutput, IntentRegistry, Realm, RealmRegistry};
pub use session::SessionManager;

/// Per-execution context handed to realm handlers on dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Originating session.
    pub session_id: SessionId,
    /// Originating solution.
    pub solution_id: String,
    /// The execution this context belongs to.
    pub execution_id: ExecutionId,
    /// Boundary contract assigned at accept-time, if one was required.
    pub boundary_contract: Option<BoundaryContract>,
}

struct IdempotencyKey {
    tenant_id: TenantId,
    intent_type: String,
    key: String,
}

impl PartialEq for IdempotencyKey {
    fn eq(&self, other: &Self) -> bool {
        self.tenant_id == other.tenant_id && self.intent_type == other.intent_type && self.key == other.key
    }
}
impl Eq for IdempotencyKey {}
impl std::hash::Hash for IdempotencyKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.tenant_id.hash(state);
        self.intent_type.hash(state);
        self.key.hash(state);
    }
}

/// Converts an accepted Intent into a durable, observable Execution. Owns
/// no storage itself — every suspension point delegates to the WAL, State
/// Surface, Outbox, Artifact Plane, or a Data Steward.
pub struct ExecutionLifecycleManager {
    intents: Arc<IntentRegistry>,
    wal: Arc<WriteAheadLog>,
    state: Arc<StateSurface>,
    outbox: Arc<Outbox>,
    artifacts: Arc<ArtifactPlane>,
    steward: Option<Arc<dyn DataSteward>>,
    sessions: Arc<SessionManager>,
    contract_required_intent_types: HashSet<String>,
    idempotency: Mutex<std::collections::HashMap<IdempotencyKey, ExecutionResult>>,
}

impl ExecutionLifecycleManager {
    /// Construct a lifecycle manager. `contract_required_intent_types` lists
    /// intent types for which a Data Steward is mandatory (e.g. `ingest-file`);
    /// absent a steward, submitting one of these is a §8A failure regardless
    /// of `steward`.
    pub fn new(
        intents: Arc<IntentRegistry>,
        wal: Arc<WriteAheadLog>,
        state: Arc<StateSurface>,
        outbox: Arc<Outbox>,
        artifacts: Arc<ArtifactPlane>,
        steward: Option<Arc<dyn DataSteward>>,
        sessions: Arc<SessionManager>,
        contract_required_intent_types: HashSet<String>,
    ) -> Self {
        Self {
            intents,
            wal,
            state,
            outbox,
            artifacts,
            steward,
            sessions,
            contract_required_intent_types,
            idempotency: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Run the full execution lifecycle for `intent`: validate and check
    /// idempotency, assign a boundary contract, record to the WAL, dispatch
    /// to every registered handler, commit state, drain the outbox, and
    /// cache the result for idempotency replay.
    pub async fn execute(&self, intent: Intent) -> Result<ExecutionResult, FabricError> {
        // Step 1: validate + idempotency replay.
        if let Some(key) = &intent.idempotency_key {
            let idem_key = IdempotencyKey {
                tenant_id: intent.tenant_id.clone(),
                intent_type: intent.intent_type.clone(),
                key: key.clone(),
            };
            if let Some(result) = self.idempotency.lock().await.get(&idem_key) {
                return Ok(result.clone());
            }
        }

        let handlers = self.intents.get_handlers(&intent.intent_type).await;
        if handlers.is_empty() {
            return Err(FabricError::validation(format!(
                "no handler registered for intent type {}",
                intent.intent_type
            )));
        }

        // Step 2: boundary contract.
        let contract = self.assign_boundary_contract(&intent).await?;

        // Step 3: WAL intent-received.
        let mut received_payload = Fields::new();
        received_payload.insert("intent_id".into(), json!(intent.intent_id));
        received_payload.insert("intent_type".into(), json!(intent.intent_type));
        received_payload.insert("session_id".into(), json!(intent.session_id));
        self.wal
            .append(WalEventType::IntentReceived, &intent.tenant_id, received_payload)
            .await;

        // Step 4: create execution record.
        let execution_id = fabric_clock::new_id();
        let mut execution_state = Fields::new();
        execution_state.insert("status".into(), json!("pending"));
        execution_state.insert("intent_id".into(), json!(intent.intent_id));
        execution_state.insert("tenant_id".into(), json!(intent.tenant_id));
        execution_state.insert("session_id".into(), json!(intent.session_id));
        execution_state.insert("created_at".into(), json!(Utc::now().to_rfc3339()));
        self.state
            .set_execution_state(&intent.tenant_id, &execution_id, execution_state, Strategy::Hot)
            .await?;

        // Step 5: WAL execution-started.
        let mut started_payload = Fields::new();
        started_payload.insert("execution_id".into(), json!(execution_id));
        started_payload.insert("session_id".into(), json!(intent.session_id));
        self.wal
            .append(WalEventType::ExecutionStarted, &intent.tenant_id, started_payload)
            .await;

        let ctx = ExecutionContext {
            tenant_id: intent.tenant_id.clone(),
            session_id: intent.session_id.clone(),
            solution_id: intent.solution_id.clone(),
            execution_id: execution_id.clone(),
            boundary_contract: contract,
        };

        // Steps 6-9: dispatch, merge, outbox, per-handler WAL.
        let dispatch = self.dispatch(&intent, &ctx, &handlers).await;

        let (result, recorded_events) = match dispatch {
            Ok((artifacts, metadata, events)) => (
                ExecutionResult {
                    execution_id: execution_id.clone(),
                    success: true,
                    artifacts,
                    error: None,
                    metadata,
                },
                events,
            ),
            Err(err) => {
                error!(execution_id = %execution_id, %err, "execution failed");
                (
                    ExecutionResult {
                        execution_id: execution_id.clone(),
                        success: false,
                        artifacts: std::collections::HashMap::new(),
                        error: Some(err.message.clone()),
                        metadata: Fields::new(),
                    },
                    Vec::new(),
                )
            }
        };

        // Step 10: commit.
        let mut commit_state = Fields::new();
        commit_state.insert(
            "status".into(),
            json!(if result.success { "succeeded" } else { "failed" }),
        );
        commit_state.insert("intent_id".into(), json!(intent.intent_id));
        commit_state.insert("tenant_id".into(), json!(intent.tenant_id));
        commit_state.insert("session_id".into(), json!(intent.session_id));
        if let Some(error) = &result.error {
            commit_state.insert("error".into(), json!(error));
        }
        commit_state.insert("artifacts".into(), json!(result.artifacts));
        commit_state.insert("events".into(), json!(recorded_events));
        self.state
            .set_execution_state(&intent.tenant_id, &execution_id, commit_state, Strategy::Hot)
            .await?;
        if let Err(err) = self.sessions.touch_last_activity(&intent.tenant_id, &intent.session_id).await {
            warn!(%err, "failed to touch session last-activity timestamp");
        }

        // Step 11: WAL execution-completed / execution-failed.
        let mut finished_payload = Fields::new();
        finished_payload.insert("execution_id".into(), json!(execution_id));
        finished_payload.insert("session_id".into(), json!(intent.session_id));
        if let Some(error) = &result.error {
            finished_payload.insert("error".into(), json!(error));
        }
        let finished_type = if result.success {
            WalEventType::ExecutionCompleted
        } else {
            WalEventType::ExecutionFailed
        };
        self.wal.append(finished_type, &intent.tenant_id, finished_payload).await;

        // Step 12: drain outbox. A drain failure never fails the execution.
        if let Err(err) = self.outbox.publish_events(&execution_id).await {
            warn!(execution_id = %execution_id, %err, "outbox drain failed, will retry later");
        }

        if let Some(key) = &intent.idempotency_key {
            let idem_key = IdempotencyKey {
                tenant_id: intent.tenant_id.clone(),
                intent_type: intent.intent_type.clone(),
                key: key.clone(),
            };
            self.idempotency.lock().await.insert(idem_key, result.clone());
        }

        // Step 13.
        Ok(result)
    }

    async fn assign_boundary_contract(&self, intent: &Intent) -> Result<Option<BoundaryContract>, FabricError> {
        let statically_required = self.contract_required_intent_types.contains(&intent.intent_type);
        match &self.steward {
            Some(steward) => {
                if steward.requires_contract(&intent.intent_type) || statically_required {
                    Ok(Some(steward.assign_contract(intent).await?))
                } else {
                    Ok(None)
                }
            }
            None if statically_required => Err(FabricError::contract_8a("data steward")),
            None => Ok(None),
        }
    }

    async fn dispatch(
        &self,
        intent: &Intent,
        ctx: &ExecutionContext,
        handlers: &[(String, Arc<dyn Realm>)],
    ) -> Result<(std::collections::HashMap<String, ArtifactRef>, Fields, Vec<serde_json::Value>), FabricError> {
        let mut artifacts: std::collections::HashMap<String, ArtifactRef> = std::collections::HashMap::new();
        let mut events = Vec::new();

        for (realm_name, realm) in handlers {
            let outcome = realm.handle_intent(intent, ctx).await;
            let step_type = match &outcome {
                Ok(_) => WalEventType::StepCompleted,
                Err(_) => WalEventType::StepFailed,
            };
            let mut step_payload = Fields::new();
            step_payload.insert("execution_id".into(), json!(ctx.execution_id));
            step_payload.insert("session_id".into(), json!(intent.session_id));
            step_payload.insert("realm".into(), json!(realm_name));
            self.wal.append(step_type, &intent.tenant_id, step_payload).await;

            let output = outcome.map_err(|err| {
                FabricError::handler_failed(format!("realm {realm_name} failed: {}", err.message))
            })?;

            for (key, value) in output.artifacts {
                if artifacts.contains_key(&key) {
                    warn!(realm = %realm_name, %key, "duplicate artifact key across handlers (realm design error); last writer wins");
                }
                let resolved = self.resolve_artifact(intent, ctx, realm_name, &key, value).await?;
                artifacts.insert(key, resolved);
            }

            for event in output.events {
                let entry = self
                    .outbox
                    .append(&ctx.execution_id, event_type_of(&event), event.clone())
                    .await;
                events.push(json!({"event_id": entry.event_id}));
            }
        }

        let mut metadata = Fields::new();
        metadata.insert("handler_count".into(), json!(handlers.len()));
        if let Some(contract) = &ctx.boundary_contract {
            metadata.insert("contract_id".into(), json!(contract.contract_id));
        }
        Ok((artifacts, metadata, events))
    }

    async fn resolve_artifact(
        &self,
        intent: &Intent,
        ctx: &ExecutionContext,
        realm_name: &str,
        key: &str,
        value: ArtifactRef,
    ) -> Result<ArtifactRef, FabricError> {
        match value {
            ArtifactRef::Reference { artifact_id } => Ok(ArtifactRef::Reference { artifact_id }),
            ArtifactRef::Inline(payload) => {
                let request = CreateArtifactRequest::defaults(
                    key.to_string(),
                    payload,
                    ArtifactContext {
                        tenant_id: intent.tenant_id.clone(),
                        session_id: intent.session_id.clone(),
                        solution_id: intent.solution_id.clone(),
                        owning_realm: realm_name.to_string(),
                        originating_intent_type: intent.intent_type.clone(),
                        originating_intent_id: intent.intent_id.clone(),
                        execution_id: ctx.execution_id.clone(),
                    },
                );
                let created = self.artifacts.create_artifact(request).await?;
                Ok(ArtifactRef::Reference { artifact_id: created.artifact_id })
            }
        }
    }
}

fn event_type_of(event: &serde_json::Value) -> String {
    event
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or("realm-event")
        .to_string()
}

/// Whether `err` carries the §8A marker — convenience re-export for callers
/// that only have a [`FabricError`] and want to branch on it.
pub fn is_contract_8a(err: &FabricError) -> bool {
    err.kind == ErrorKind::Contract8A
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fabric_steward::StaticDataSteward;
    use fabric_types::IntentRequest;

    struct EchoRealm;

    #[async_trait]
    impl Realm for EchoRealm {
        fn name(&self) -> &str {
            "echo-realm"
        }
        fn declare_intents(&self) -> Vec<String> {
            vec!["echo".to_string()]
        }
        async fn handle_intent(
            &self,
            _intent: &Intent,
            _ctx: &ExecutionContext,
        ) -> Result<HandlerOutput, FabricError> {
            let mut artifacts = std::collections::HashMap::new();
            artifacts.insert("echoed".to_string(), ArtifactRef::Inline(json!("ok")));
            Ok(HandlerOutput { artifacts, events: vec![json!({"event_type": "echoed"})] })
        }
    }

    struct FailingRealm;

    #[async_trait]
    impl Realm for FailingRealm {
        fn name(&self) -> &str {
            "failing-realm"
        }
        fn declare_intents(&self) -> Vec<String> {
            vec!["boom".to_string()]
        }
        async fn handle_intent(
            &self,
            _intent: &Intent,
            _ctx: &ExecutionContext,
        ) -> Result<HandlerOutput, FabricError> {
            Err(FabricError::handler_failed("realm blew up"))
        }
    }

    async fn harness() -> (Arc<RealmRegistry>, ExecutionLifecycleManager) {
        let intents = Arc::new(IntentRegistry::new());
        let realms = Arc::new(RealmRegistry::new(intents.clone()));
        realms.register(Arc::new(EchoRealm)).await.unwrap();
        realms.register(Arc::new(FailingRealm)).await.unwrap();

        let state = Arc::new(StateSurface::in_memory());
        let wal = Arc::new(WriteAheadLog::new(None));
        let outbox = Arc::new(Outbox::new(Box::new(fabric_outbox::InMemoryEventBus::new())));
        let artifacts = Arc::new(ArtifactPlane::new(
            StateSurface::in_memory(),
            Box::new(fabric_artifacts::InMemoryArtifactStorage::new()),
        ));
        let sessions = Arc::new(SessionManager::new(state.clone(), wal.clone()));

        let elm = ExecutionLifecycleManager::new(
            intents,
            wal,
            state,
            outbox,
            artifacts,
            Some(StaticDataSteward::shared()),
            sessions,
            ["ingest-file".to_string()].into_iter().collect(),
        );
        (realms, elm)
    }

    fn intent(intent_type: &str, idempotency_key: Option<String>) -> Intent {
        Intent::create(IntentRequest {
            intent_type: intent_type.to_string(),
            tenant_id: "t1".to_string(),
            session_id: "s1".to_string(),
            solution_id: "sol1".to_string(),
            idempotency_key,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_execution_persists_artifact_reference() {
        let (_realms, elm) = harness().await;
        let result = elm.execute(intent("echo", None)).await.unwrap();
        assert!(result.success);
        assert!(matches!(result.artifacts.get("echoed"), Some(ArtifactRef::Reference { .. })));
    }

    #[tokio::test]
    async fn failing_handler_yields_failed_execution_not_a_propagated_error() {
        let (_realms, elm) = harness().await;
        let result = elm.execute(intent("boom", None)).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("realm blew up"));
    }

    #[tokio::test]
    async fn unknown_intent_type_fails_synchronously_before_any_execution_record() {
        let (_realms, elm) = harness().await;
        let err = elm.execute(intent("does-not-exist", None)).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Validation));
    }

    #[tokio::test]
    async fn idempotency_key_replay_returns_the_original_result() {
        let (_realms, elm) = harness().await;
        let key = Some("idem-1".to_string());
        let first = elm.execute(intent("echo", key.clone())).await.unwrap();
        let second = elm.execute(intent("echo", key)).await.unwrap();
        assert_eq!(first.execution_id, second.execution_id);
    }

    #[tokio::test]
    async fn missing_data_steward_on_a_contract_required_intent_is_contract_8a() {
        let intents = Arc::new(IntentRegistry::new());
        let realms = Arc::new(RealmRegistry::new(intents.clone()));
        realms.register(Arc::new(EchoRealm)).await.unwrap();

        let state = Arc::new(StateSurface::in_memory());
        let wal = Arc::new(WriteAheadLog::new(None));
        let outbox = Arc::new(Outbox::new(Box::new(fabric_outbox::InMemoryEventBus::new())));
        let artifacts = Arc::new(ArtifactPlane::new(
            StateSurface::in_memory(),
            Box::new(fabric_artifacts::InMemoryArtifactStorage::new()),
        ));
        let sessions = Arc::new(SessionManager::new(state.clone(), wal.clone()));

        // "echo" is treated as contract-required here to exercise the §8A
        // path without a real ingest-file realm in this unit test.
        let elm = ExecutionLifecycleManager::new(
            intents,
            wal,
            state,
            outbox,
            artifacts,
            None,
            sessions,
            ["echo".to_string()].into_iter().collect(),
        );

        let err = elm.execute(intent("echo", None)).await.unwrap_err();
        assert!(err.is_contract_8a());
        assert!(err.message.contains("Platform contract §8A"));
    }
}
