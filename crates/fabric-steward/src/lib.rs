#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-steward** – Data Steward collaborator interface.
//!
//! The Data Steward is an external SDK interface the Execution Lifecycle
//! Manager consults to assign a boundary contract before dispatch. It is the
//! third dependency named by boundary-contract rule §8A alongside the State
//! Surface and Artifact registry: when an intent type requires a contract
//! and no steward is wired, assignment must fail typed rather than proceed
//! with an absent contract.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use fabric_types::{FabricError, Intent, IntentId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Whether an execution's outputs persist or are ephemeral.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    /// Outputs are written durably and survive beyond the execution.
    Persist,
    /// Outputs exist only for the lifetime of the execution.
    Ephemeral,
}

/// Who may observe an execution's outputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible only to the originating session.
    Private,
    /// Visible tenant-wide.
    Tenant,
    /// Visible across tenants (governance-controlled).
    Shared,
}

/// Materialization, retention, and visibility policy attached to an
/// execution at accept-time and propagated into its context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundaryContract {
    /// Stable per-intent contract id (assignment is idempotent on intent id).
    pub contract_id: String,
    /// The intent this contract was assigned for.
    pub intent_id: IntentId,
    /// Persist vs ephemeral.
    pub materialization: Materialization,
    /// Opaque retention policy tag.
    pub retention_policy: String,
    /// Visibility scope.
    pub visibility: Visibility,
}

/// External collaborator assigning boundary contracts to intents.
#[async_trait]
pub trait DataSteward: Send + Sync {
    /// Whether `intent_type` requires a boundary contract before dispatch.
    fn requires_contract(&self, intent_type: &str) -> bool;

    /// Assign (or return the previously-assigned) contract for `intent`.
    async fn assign_contract(&self, intent: &Intent) -> Result<BoundaryContract, FabricError>;
}

/// Reference Data Steward: a configurable set of contract-requiring intent
/// types, idempotent per-intent assignment, and a fixed default policy.
///
/// Assignment is idempotent per intent id the same way the Execution
/// Lifecycle Manager's own idempotency-key replay works, applied here to
/// contract assignment instead of execution results.
pub struct StaticDataSteward {
    requires: HashSet<String>,
    assigned: Mutex<std::collections::HashMap<IntentId, BoundaryContract>>,
    default_materialization: Materialization,
    default_retention_policy: String,
    default_visibility: Visibility,
}

impl StaticDataSteward {
    /// Construct a steward that requires a contract for exactly the intent
    /// types in `requires_contract_for`, applying the given default policy
    /// to every assignment.
    pub fn new(
        requires_contract_for: impl IntoIterator<Item = String>,
        default_materialization: Materialization,
        default_retention_policy: impl Into<String>,
        default_visibility: Visibility,
    ) -> Self {
        Self {
            requires: requires_contract_for.into_iter().collect(),
            assigned: Mutex::new(std::collections::HashMap::new()),
            default_materialization,
            default_retention_policy: default_retention_policy.into(),
            default_visibility,
        }
    }

    /// The conservative default: only `ingest-file` requires a contract,
    /// persisted, tenant-visible, "standard" retention.
    pub fn with_defaults() -> Self {
        Self::new(
            ["ingest-file".to_string()],
            Materialization::Persist,
            "standard",
            Visibility::Tenant,
        )
    }

    /// Wrap in an `Arc` for sharing across the lifecycle manager.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::with_defaults())
    }
}

#[async_trait]
impl DataSteward for StaticDataSteward {
    fn requires_contract(&self, intent_type: &str) -> bool {
        self.requires.contains(intent_type)
    }

    async fn assign_contract(&self, intent: &Intent) -> Result<BoundaryContract, FabricError> {
        let mut assigned = self.assigned.lock().await;
        if let Some(existing) = assigned.get(&intent.intent_id) {
            return Ok(existing.clone());
        }
        let contract = BoundaryContract {
            contract_id: fabric_clock::new_prefixed_id("contract"),
            intent_id: intent.intent_id.clone(),
            materialization: self.default_materialization,
            retention_policy: self.default_retention_policy.clone(),
            visibility: self.default_visibility,
        };
        assigned.insert(intent.intent_id.clone(), contract.clone());
        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_types::IntentRequest;

    fn intent(intent_type: &str) -> Intent {
        Intent::create(IntentRequest {
            intent_type: intent_type.to_string(),
            tenant_id: "t1".to_string(),
            session_id: "s1".to_string(),
            solution_id: "sol1".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn only_configured_intent_types_require_a_contract() {
        let steward = StaticDataSteward::with_defaults();
        assert!(steward.requires_contract("ingest-file"));
        assert!(!steward.requires_contract("generate-roadmap"));
    }

    #[tokio::test]
    async fn assignment_is_idempotent_per_intent_id() {
        let steward = StaticDataSteward::with_defaults();
        let intent = intent("ingest-file");
        let first = steward.assign_contract(&intent).await.unwrap();
        let second = steward.assign_contract(&intent).await.unwrap();
        assert_eq!(first.contract_id, second.contract_id);
    }

    #[tokio::test]
    async fn different_intents_get_different_contracts() {
        let steward = StaticDataSteward::with_defaults();
        let a = steward.assign_contract(&intent("ingest-file")).await.unwrap();
        let b = steward.assign_contract(&intent("ingest-file")).await.unwrap();
        // Same intent type, but `intent()` mints a fresh intent id each call.
        assert_ne!(a.intent_id, b.intent_id);
        assert_ne!(a.contract_id, b.contract_id);
    }
}
