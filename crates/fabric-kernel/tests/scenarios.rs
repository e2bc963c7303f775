//! Cross-component scenarios: anonymous-session upgrade with cross-tenant
//! isolation, idempotency-key replay, and a boundary-contract probe on an
//! intent type with no steward wired.

use std::sync::Arc;

use async_trait::async_trait;
use fabric_artifacts::{ArtifactPlane, InMemoryArtifactStorage};
use fabric_bus::WriteAheadLog;
use fabric_kernel::{
    ExecutionContext, ExecutionLifecycleManager, HandlerOutput, IntentRegistry, Realm,
    RealmRegistry, SessionManager,
};
use fabric_outbox::{InMemoryEventBus, Outbox};
use fabric_steward::StaticDataSteward;
use fabric_store::StateSurface;
use fabric_types::{FabricError, Fields, Intent, IntentRequest};
use serde_json::json;

struct NoopRealm(&'static str, &'static str);

#[async_trait]
impl Realm for NoopRealm {
    fn name(&self) -> &str {
        self.0
    }
    fn declare_intents(&self) -> Vec<String> {
        vec![self.1.to_string()]
    }
    async fn handle_intent(
        &self,
        _intent: &Intent,
        _ctx: &ExecutionContext,
    ) -> Result<HandlerOutput, FabricError> {
        Ok(HandlerOutput::default())
    }
}

#[tokio::test]
async fn s1_anonymous_session_upgrade_then_cross_tenant_isolation() {
    let state = Arc::new(StateSurface::in_memory());
    let wal = Arc::new(WriteAheadLog::new(None));
    let sessions = SessionManager::new(state, wal);

    let anon = sessions.create_anonymous_session(Fields::new(), Fields::new()).await.unwrap();
    assert!(sessions.get_session(&anon.session_id, Some("t1")).await.unwrap().is_none());

    let upgraded = sessions
        .upgrade_session(&anon.session_id, "t1".to_string(), "u1".to_string(), Fields::new())
        .await
        .unwrap();
    assert_eq!(upgraded.tenant_id, Some("t1".to_string()));
    assert!(!upgraded.is_anonymous);

    assert!(sessions.get_session(&anon.session_id, None).await.unwrap().is_none());
    let fetched = sessions.get_session(&anon.session_id, Some("t1")).await.unwrap().unwrap();
    assert_eq!(fetched.user_id, Some("u1".to_string()));
}

async fn elm_harness() -> ExecutionLifecycleManager {
    let intents = Arc::new(IntentRegistry::new());
    let realms = Arc::new(RealmRegistry::new(intents.clone()));
    realms.register(Arc::new(NoopRealm("ingest-realm", "ingest-file"))).await.unwrap();

    let state = Arc::new(StateSurface::in_memory());
    let wal = Arc::new(WriteAheadLog::new(None));
    let outbox = Arc::new(Outbox::new(Box::new(InMemoryEventBus::new())));
    let artifacts = Arc::new(ArtifactPlane::new(
        StateSurface::in_memory(),
        Box::new(InMemoryArtifactStorage::new()),
    ));
    let sessions = Arc::new(SessionManager::new(state.clone(), wal.clone()));

    ExecutionLifecycleManager::new(
        intents,
        wal,
        state,
        outbox,
        artifacts,
        Some(StaticDataSteward::shared()),
        sessions,
        ["ingest-file".to_string()].into_iter().collect(),
    )
}

fn ingest_intent(idempotency_key: Option<String>) -> Intent {
    let mut parameters = Fields::new();
    parameters.insert("file_bytes_hex".into(), json!("68656c6c6f"));
    Intent::create(IntentRequest {
        intent_type: "ingest-file".to_string(),
        tenant_id: "t1".to_string(),
        session_id: "s1".to_string(),
        solution_id: "sol1".to_string(),
        parameters,
        idempotency_key,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn s5_idempotency_key_replay_returns_original_execution_without_new_wal_entry() {
    let elm = elm_harness().await;
    let key = Some("k1".to_string());

    let first = elm.execute(ingest_intent(key.clone())).await.unwrap();
    assert!(first.success);

    let second = elm.execute(ingest_intent(key)).await.unwrap();
    assert_eq!(first.execution_id, second.execution_id);
}

#[tokio::test]
async fn s6_contract_8a_probe_on_ingest_file_without_a_data_steward() {
    let intents = Arc::new(IntentRegistry::new());
    let realms = Arc::new(RealmRegistry::new(intents.clone()));
    realms.register(Arc::new(NoopRealm("ingest-realm", "ingest-file"))).await.unwrap();

    let state = Arc::new(StateSurface::in_memory());
    let wal = Arc::new(WriteAheadLog::new(None));
    let outbox = Arc::new(Outbox::new(Box::new(InMemoryEventBus::new())));
    let artifacts = Arc::new(ArtifactPlane::new(
        StateSurface::in_memory(),
        Box::new(InMemoryArtifactStorage::new()),
    ));
    let sessions = Arc::new(SessionManager::new(state.clone(), wal.clone()));

    let elm = ExecutionLifecycleManager::new(
        intents,
        wal,
        state,
        outbox,
        artifacts,
        None,
        sessions,
        ["ingest-file".to_string()].into_iter().collect(),
    );

    let err = elm.execute(ingest_intent(None)).await.unwrap_err();
    assert!(err.message.contains("Platform contract §8A"));
}
