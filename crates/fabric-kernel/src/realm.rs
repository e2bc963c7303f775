//! Realm Registry & Realm SDK.
//!
//! A Realm is a polymorphic handler exposing a name, the intent types it
//! declares, and `handle_intent`. The registry validates realms on
//! registration (declare/validate/handle contract) and maps each declared
//! intent type to an ordered list of handlers for dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use fabric_types::{FabricError, Intent};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::ExecutionContext;

/// What a realm handler returns: artifacts (by key) and events, both
/// defaulting to empty when a handler doesn't populate them.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    /// Artifacts produced, keyed by realm-chosen name.
    pub artifacts: HashMap<String, fabric_types::ArtifactRef>,
    /// Events emitted for the outbox.
    pub events: Vec<Value>,
}

/// A domain handler: declares the intent types it serves and dispatches
/// them. Realms must not mutate the intent or execution context directly;
/// they return descriptions of changes via [`HandlerOutput`].
#[async_trait]
pub trait Realm: Send + Sync {
    /// Unique realm name.
    fn name(&self) -> &str;

    /// Intent types this realm declares (must be non-empty).
    fn declare_intents(&self) -> Vec<String>;

    /// Handle one intent, returning artifacts and events.
    async fn handle_intent(
        &self,
        intent: &Intent,
        ctx: &ExecutionContext,
    ) -> Result<HandlerOutput, FabricError>;
}

/// Map from intent type to an ordered list of (realm name, realm) handlers.
/// Multiple handlers for the same intent type fan out; invocation order is
/// registration order.
#[derive(Default)]
pub struct IntentRegistry {
    handlers: RwLock<HashMap<String, Vec<(String, Arc<dyn Realm>)>>>,
}

impl IntentRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `realm` as a handler for `intent_type`, appended after any
    /// existing handlers for that type.
    pub async fn register_intent(&self, intent_type: String, realm: Arc<dyn Realm>) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(intent_type)
            .or_default()
            .push((realm.name().to_string(), realm));
    }

    /// Handlers registered for `intent_type`, in registration order.
    pub async fn get_handlers(&self, intent_type: &str) -> Vec<(String, Arc<dyn Realm>)> {
        self.handlers.read().await.get(intent_type).cloned().unwrap_or_default()
    }

    /// The set of every intent type with at least one handler.
    pub async fn list_intents(&self) -> HashSet<String> {
        self.handlers.read().await.keys().cloned().collect()
    }

    /// Remove every handler belonging to `realm_name` for `intent_type`.
    async fn deregister_realm_from(&self, intent_type: &str, realm_name: &str) {
        let mut handlers = self.handlers.write().await;
        if let Some(list) = handlers.get_mut(intent_type) {
            list.retain(|(name, _)| name != realm_name);
            if list.is_empty() {
                handlers.remove(intent_type);
            }
        }
    }
}

/// Validates realms on registration and tracks which intent types each
/// declares, so `validate_intent` can reject unknown intent types before
/// dispatch.
pub struct RealmRegistry {
    intents: Arc<IntentRegistry>,
    realms: RwLock<HashMap<String, Arc<dyn Realm>>>,
}

impl RealmRegistry {
    /// Construct a realm registry backed by `intents`.
    pub fn new(intents: Arc<IntentRegistry>) -> Self {
        Self { intents, realms: RwLock::new(HashMap::new()) }
    }

    /// Validate and register `realm`: it must declare at least one intent
    /// type, and its name must not already be registered. Registers every
    /// declared intent type with the Intent Registry.
    pub async fn register(&self, realm: Arc<dyn Realm>) -> Result<(), FabricError> {
        let declared = realm.declare_intents();
        if declared.is_empty() {
            return Err(FabricError::validation(format!(
                "realm {} declares no intent types",
                realm.name()
            )));
        }
        let mut realms = self.realms.write().await;
        if realms.contains_key(realm.name()) {
            return Err(FabricError::validation(format!(
                "realm {} is already registered",
                realm.name()
            )));
        }
        for intent_type in &declared {
            self.intents.register_intent(intent_type.clone(), realm.clone()).await;
        }
        realms.insert(realm.name().to_string(), realm);
        Ok(())
    }

    /// Remove `realm_name` and every intent type it registered.
    pub async fn deregister(&self, realm_name: &str) -> Result<(), FabricError> {
        let mut realms = self.realms.write().await;
        let Some(realm) = realms.remove(realm_name) else {
            return Err(FabricError::validation(format!("realm {realm_name} is not registered")));
        };
        for intent_type in realm.declare_intents() {
            self.intents.deregister_realm_from(&intent_type, realm_name).await;
        }
        Ok(())
    }

    /// Reject `intent` if no registered realm declares its intent type.
    pub async fn validate_intent(&self, intent: &Intent) -> Result<(), FabricError> {
        if self.intents.get_handlers(&intent.intent_type).await.is_empty() {
            return Err(FabricError::validation(format!(
                "unknown intent type: {}",
                intent.intent_type
            )));
        }
        Ok(())
    }

    /// Shared handle to the underlying Intent Registry.
    pub fn intent_registry(&self) -> Arc<IntentRegistry> {
        self.intents.clone()
    }
}
