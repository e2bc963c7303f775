#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-types** – Shared primitive data structures for the execution fabric.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph so
//! every other crate can depend on it without causing cycles. It makes no
//! assumptions about I/O, storage technology, or transport.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod error;
pub use error::{ErrorKind, FabricError};

/// Opaque tenant identifier. Absent (`None`) on a `Session` means anonymous.
pub type TenantId = String;
/// Opaque, globally-unique session identifier.
pub type SessionId = String;
/// Opaque, globally-unique intent identifier.
pub type IntentId = String;
/// Opaque, globally-unique execution identifier.
pub type ExecutionId = String;
/// Opaque, globally-unique artifact identifier.
pub type ArtifactId = String;
/// Opaque, globally-unique event identifier.
pub type EventId = String;
/// A solution identifier scoping the intent's unit of work.
pub type SolutionId = String;

/// Generic JSON-object map used for parameters, metadata, and payloads.
pub type Fields = HashMap<String, Value>;

//─────────────────────────────
//  Session
//─────────────────────────────

/// A long-lived context, possibly anonymous, under which intents are submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Opaque, globally-unique session id.
    pub session_id: SessionId,
    /// Owning tenant, `None` while the session is anonymous.
    pub tenant_id: Option<TenantId>,
    /// Authenticated user id, `None` while the session is anonymous.
    pub user_id: Option<String>,
    /// Opaque execution contract configuration the session carries forward.
    pub execution_contract: Fields,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-updated timestamp.
    pub updated_at: DateTime<Utc>,
    /// Whether the session is still anonymous.
    pub is_anonymous: bool,
    /// Arbitrary caller-supplied metadata.
    pub metadata: Fields,
}

impl Session {
    /// Construct a fresh anonymous session.
    pub fn anonymous(session_id: SessionId, execution_contract: Fields, metadata: Fields) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            tenant_id: None,
            user_id: None,
            execution_contract,
            created_at: now,
            updated_at: now,
            is_anonymous: true,
            metadata,
        }
    }

    /// Construct a session that is tenant-scoped from the start.
    pub fn authenticated(
        session_id: SessionId,
        tenant_id: TenantId,
        user_id: String,
        execution_contract: Fields,
        metadata: Fields,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            tenant_id: Some(tenant_id),
            user_id: Some(user_id),
            execution_contract,
            created_at: now,
            updated_at: now,
            is_anonymous: false,
            metadata,
        }
    }
}

//─────────────────────────────
//  Intent
//─────────────────────────────

/// A typed request to perform a named operation against a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    /// Unique, immutable intent id.
    pub intent_id: IntentId,
    /// Handler lookup key.
    pub intent_type: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Session the intent was submitted under.
    pub session_id: SessionId,
    /// Solution the intent belongs to.
    pub solution_id: SolutionId,
    /// Realm-interpreted parameters (opaque to the core).
    pub parameters: Fields,
    /// Caller-supplied metadata.
    pub metadata: Fields,
    /// Optional idempotency key; replays with a completed result are no-ops.
    pub idempotency_key: Option<String>,
}

/// Fields required to mint a new [`Intent`].
#[derive(Debug, Clone, Default)]
pub struct IntentRequest {
    /// Intent id override; generated when absent.
    pub intent_id: Option<IntentId>,
    /// Handler lookup key.
    pub intent_type: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Session the intent is submitted under.
    pub session_id: SessionId,
    /// Solution the intent belongs to.
    pub solution_id: SolutionId,
    /// Realm-interpreted parameters.
    pub parameters: Fields,
    /// Caller-supplied metadata.
    pub metadata: Fields,
    /// Optional idempotency key.
    pub idempotency_key: Option<String>,
}

impl Intent {
    /// Create an intent from a request, validating required boundary fields.
    ///
    /// Rejects missing tenant, session, solution, or intent type; generates
    /// an intent id when absent; never inspects `parameters`.
    pub fn create(req: IntentRequest) -> Result<Self, FabricError> {
        if req.intent_type.trim().is_empty() {
            return Err(FabricError::validation("intent type is required"));
        }
        if req.tenant_id.trim().is_empty() {
            return Err(FabricError::validation("tenant id is required"));
        }
        if req.session_id.trim().is_empty() {
            return Err(FabricError::validation("session id is required"));
        }
        if req.solution_id.trim().is_empty() {
            return Err(FabricError::validation("solution id is required"));
        }
        Ok(Self {
            intent_id: req.intent_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            intent_type: req.intent_type,
            tenant_id: req.tenant_id,
            session_id: req.session_id,
            solution_id: req.solution_id,
            parameters: req.parameters,
            metadata: req.metadata,
            idempotency_key: req.idempotency_key,
        })
    }
}

//─────────────────────────────
//  Execution
//─────────────────────────────

/// Monotonic execution status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Dispatched to one or more realm handlers.
    Running,
    /// Terminal: all handlers completed without error.
    Succeeded,
    /// Terminal: a handler raised, or no handler was registered.
    Failed,
    /// Terminal: cancelled mid-flight; accounted like `Failed`.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is one of the terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// A reference to a persisted artifact, or an inline structured value a realm
/// returned that has not yet been resolved into a reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ArtifactRef {
    /// Resolved reference to a persisted artifact.
    Reference {
        /// Persisted artifact id.
        artifact_id: ArtifactId,
    },
    /// Inline structured artifact not yet persisted.
    Inline(Value),
}

/// One run of one intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    /// Unique execution id.
    pub execution_id: ExecutionId,
    /// The intent this execution binds to.
    pub intent_id: IntentId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Originating session.
    pub session_id: SessionId,
    /// Current status.
    pub status: ExecutionStatus,
    /// Artifacts produced, appended-only during the execution.
    pub artifacts: HashMap<String, ArtifactRef>,
    /// Events recorded by realm handlers.
    pub events: Vec<Value>,
    /// Error message, set only when `status == Failed`.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// Construct a new, pending execution record.
    pub fn new(execution_id: ExecutionId, intent: &Intent) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            intent_id: intent.intent_id.clone(),
            tenant_id: intent.tenant_id.clone(),
            session_id: intent.session_id.clone(),
            status: ExecutionStatus::Pending,
            artifacts: HashMap::new(),
            events: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result returned by the Execution Lifecycle Manager's `execute` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The execution id created for this intent.
    pub execution_id: ExecutionId,
    /// Whether the execution succeeded.
    pub success: bool,
    /// Artifacts, referenced by key.
    pub artifacts: HashMap<String, ArtifactRef>,
    /// Error message when `success` is false.
    pub error: Option<String>,
    /// Free-form metadata (e.g. handler count, contract id).
    pub metadata: Fields,
}

//─────────────────────────────
//  WAL event model
//─────────────────────────────

/// Enumerated WAL event types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WalEventType {
    /// A session (anonymous or authenticated) was created.
    SessionCreated,
    /// A session was upgraded from anonymous to authenticated.
    SessionUpgraded,
    /// An intent was accepted for dispatch.
    IntentReceived,
    /// A multi-step saga began (reserved for future multi-intent flows).
    SagaStarted,
    /// One realm handler step completed.
    StepCompleted,
    /// One realm handler step failed.
    StepFailed,
    /// An execution was created and about to be dispatched.
    ExecutionStarted,
    /// An execution completed successfully.
    ExecutionCompleted,
    /// An execution failed (including cancellation).
    ExecutionFailed,
}

/// An immutable entry in the Write-Ahead Log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalEvent {
    /// Event id (unique).
    pub event_id: EventId,
    /// Event type.
    pub event_type: WalEventType,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// UTC timestamp at append time.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub payload: Fields,
}

//─────────────────────────────
//  Artifact model
//─────────────────────────────

/// Lifecycle state of an artifact. Transitions: draft -> accepted -> obsolete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Newly created, not yet reviewed.
    Draft,
    /// Reviewed and accepted.
    Accepted,
    /// Terminal: retired.
    Obsolete,
}

/// Who owns an artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOwner {
    /// Owned by the client tenant.
    Client,
    /// Owned by the platform itself.
    Platform,
    /// Shared across tenants (rare; governance-controlled).
    Shared,
}

/// What purpose an artifact serves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPurpose {
    /// Supports a decision the client is making.
    DecisionSupport,
    /// Delivered to the client as an outcome.
    Delivery,
    /// Used for governance/audit.
    Governance,
    /// Retained for learning/feedback loops.
    Learning,
}

/// One entry in an artifact's lifecycle transition history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleTransition {
    /// State transitioned from.
    pub from: LifecycleState,
    /// State transitioned to.
    pub to: LifecycleState,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Who performed the transition.
    pub actor: String,
    /// Why the transition was made.
    pub reason: Option<String>,
}

/// Registry metadata for a persisted artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRecord {
    /// Unique artifact id.
    pub artifact_id: ArtifactId,
    /// Artifact type (roadmap, blueprint, sop, workflow, solution, poc,
    /// semantic-profile, parsed-content, file, ...).
    pub artifact_type: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Originating session.
    pub session_id: SessionId,
    /// Originating solution.
    pub solution_id: SolutionId,
    /// Name of the realm that produced this artifact.
    pub owning_realm: String,
    /// Intent type that produced this artifact.
    pub originating_intent_type: String,
    /// Intent id that produced this artifact.
    pub originating_intent_id: IntentId,
    /// Execution id that produced this artifact.
    pub execution_id: ExecutionId,
    /// Content-addressed storage path for the payload blob.
    pub storage_path: String,
    /// Storage paths for ancillary visual sub-components, if any.
    pub visual_paths: Vec<String>,
    /// Whether the artifact can be regenerated from its sources.
    pub regenerable: bool,
    /// Retention policy tag (opaque to the core).
    pub retention_policy: String,
    /// Arbitrary metadata.
    pub metadata: Fields,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Owner classification.
    pub owner: ArtifactOwner,
    /// Purpose classification.
    pub purpose: ArtifactPurpose,
    /// Full lifecycle transition history.
    pub transitions: Vec<LifecycleTransition>,
    /// Version number, starting at 1.
    pub version: u32,
    /// Parent artifact id; `None` for the first version.
    pub parent_artifact_id: Option<ArtifactId>,
    /// Whether this is the current version for its (tenant, base id) family.
    pub is_current_version: bool,
    /// Upstream artifact ids this artifact depends on.
    pub source_artifact_ids: Vec<ArtifactId>,
    /// Execution ids advisory lineage has been registered for.
    pub lineage: Vec<ExecutionId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-updated timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Additional fields exposed by an artifact whose `artifact_type == "file"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    /// Tenant- and session-scoped opaque handle.
    pub file_reference: String,
    /// Human-facing display name.
    pub ui_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Content hash (hex-encoded).
    pub content_hash: String,
}
