use fabric_types::{Execution, ExecutionStatus, Intent, IntentRequest, WalEvent, WalEventType};

#[test]
fn intent_roundtrips_through_json() {
    let intent = Intent::create(IntentRequest {
        intent_id: Some("i1".into()),
        intent_type: "ingest-file".into(),
        tenant_id: "t1".into(),
        session_id: "s1".into(),
        solution_id: "sol".into(),
        parameters: Default::default(),
        metadata: Default::default(),
        idempotency_key: Some("k1".into()),
    })
    .unwrap();

    let json = serde_json::to_string(&intent).unwrap();
    let back: Intent = serde_json::from_str(&json).unwrap();
    assert_eq!(intent, back);
}

#[test]
fn execution_roundtrips_and_starts_pending() {
    let intent = Intent::create(IntentRequest {
        intent_id: Some("i1".into()),
        intent_type: "ingest-file".into(),
        tenant_id: "t1".into(),
        session_id: "s1".into(),
        solution_id: "sol".into(),
        parameters: Default::default(),
        metadata: Default::default(),
        idempotency_key: None,
    })
    .unwrap();

    let exec = Execution::new("e1".into(), &intent);
    assert_eq!(exec.status, ExecutionStatus::Pending);
    assert!(!exec.status.is_terminal());

    let json = serde_json::to_string(&exec).unwrap();
    let back: Execution = serde_json::from_str(&json).unwrap();
    assert_eq!(exec, back);
}

#[test]
fn wal_event_type_serializes_kebab_case() {
    let event = WalEvent {
        event_id: "e1".into(),
        event_type: WalEventType::IntentReceived,
        tenant_id: "t1".into(),
        timestamp: chrono::Utc::now(),
        payload: Default::default(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event_type"], "intent-received");
}
